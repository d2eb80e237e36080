use chrono::Utc;
use parking_lot::RwLock;

use super::price_repository::{PriceRepository, UpsertSummary};
use crate::database::connection::DatabaseError;
use crate::models::PriceQuote;

/// Price repository held in process memory
///
/// Same matching rules as the PostgreSQL implementation. Used when no
/// `DATABASE_URL` is configured and as the durable store in tests.
#[derive(Default)]
pub struct InMemoryPriceRepository {
    rows: RwLock<Vec<PriceQuote>>,
}

impl InMemoryPriceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a repository pre-populated through the regular upsert path
    pub fn with_quotes(quotes: &[PriceQuote]) -> Self {
        let repository = Self::new();
        repository.upsert(quotes);
        repository
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    fn upsert(&self, quotes: &[PriceQuote]) -> UpsertSummary {
        let now = Utc::now();
        let mut rows = self.rows.write();
        let mut summary = UpsertSummary::default();

        for quote in quotes {
            match rows.iter_mut().find(|row| row.quote_type == quote.quote_type) {
                Some(row) => {
                    row.name = quote.name.clone();
                    row.karat = quote.karat.clone();
                    row.purity = quote.purity.clone();
                    row.buy_price = quote.buy_price;
                    row.sell_price = quote.sell_price;
                    row.company = quote.company.clone();
                    row.updated_at = Some(quote.updated_at.unwrap_or(now));
                    summary.updated += 1;
                }
                None => {
                    let mut row = quote.clone();
                    if row.id.is_empty() || rows.iter().any(|existing| existing.id == row.id) {
                        row.id = uuid::Uuid::new_v4().to_string();
                    }
                    row.updated_at = Some(row.updated_at.unwrap_or(now));
                    row.created_at = Some(row.created_at.unwrap_or(now));
                    rows.push(row);
                    summary.inserted += 1;
                }
            }
        }

        summary
    }
}

impl PriceRepository for InMemoryPriceRepository {
    fn find_all(&self) -> Result<Vec<PriceQuote>, DatabaseError> {
        let mut rows = self.rows.read().clone();
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(rows)
    }

    fn find_by_key(&self, key: &str) -> Result<Option<PriceQuote>, DatabaseError> {
        Ok(self.rows.read().iter().find(|row| row.matches_key(key)).cloned())
    }

    fn upsert_batch(&self, quotes: &[PriceQuote]) -> Result<UpsertSummary, DatabaseError> {
        Ok(self.upsert(quotes))
    }
}
