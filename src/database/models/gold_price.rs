use chrono::{DateTime, Utc};
use diesel::prelude::*;
use rust_decimal::Decimal;

use crate::models::PriceQuote;

/// Persisted gold price row
#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = crate::database::schema::gold_prices)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct GoldPriceRow {
    pub id: String,
    pub quote_type: String,
    pub name: String,
    pub karat: String,
    pub purity: String,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    pub company: String,
    pub updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Row for insertion
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::database::schema::gold_prices)]
pub struct NewGoldPriceRow {
    pub id: String,
    pub quote_type: String,
    pub name: String,
    pub karat: String,
    pub purity: String,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    pub company: String,
    pub updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Columns overwritten when an existing `type` is upserted.
///
/// `id` and `created_at` are left untouched so a record keeps its identity.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = crate::database::schema::gold_prices)]
pub struct GoldPriceChangeset {
    pub name: String,
    pub karat: String,
    pub purity: String,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    pub company: String,
    pub updated_at: DateTime<Utc>,
}

impl NewGoldPriceRow {
    /// Build an insert row, generating an id when the quote has none
    pub fn from_quote(quote: &PriceQuote, now: DateTime<Utc>) -> Self {
        let id = if quote.id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            quote.id.clone()
        };

        Self {
            id,
            quote_type: quote.quote_type.clone(),
            name: quote.name.clone(),
            karat: quote.karat.clone(),
            purity: quote.purity.clone(),
            buy_price: quote.buy_price,
            sell_price: quote.sell_price,
            company: quote.company.clone(),
            updated_at: quote.updated_at.unwrap_or(now),
            created_at: quote.created_at.unwrap_or(now),
        }
    }
}

impl GoldPriceChangeset {
    pub fn from_quote(quote: &PriceQuote, now: DateTime<Utc>) -> Self {
        Self {
            name: quote.name.clone(),
            karat: quote.karat.clone(),
            purity: quote.purity.clone(),
            buy_price: quote.buy_price,
            sell_price: quote.sell_price,
            company: quote.company.clone(),
            updated_at: quote.updated_at.unwrap_or(now),
        }
    }
}

impl From<GoldPriceRow> for PriceQuote {
    fn from(row: GoldPriceRow) -> Self {
        Self {
            id: row.id,
            quote_type: row.quote_type,
            name: row.name,
            karat: row.karat,
            purity: row.purity,
            buy_price: row.buy_price,
            sell_price: row.sell_price,
            company: row.company,
            updated_at: Some(row.updated_at),
            created_at: Some(row.created_at),
        }
    }
}
