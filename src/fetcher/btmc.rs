use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;

use super::PriceFetcher;
use crate::error::PriceError;
use crate::models::PriceQuote;

/// Rows taken from the head of the BTMC data list
const MAX_ROWS: usize = 7;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// BTMC timestamps are Vietnam local time
const VIETNAM_OFFSET_SECS: i32 = 7 * 3600;

const DATE_FORMAT: &str = "%d/%m/%Y %H:%M";

const COMPANY: &str = "BTMC";

/// Fetches quotes from the BTMC price API
pub struct BtmcFetcher {
    client: Client,
    url: String,
}

impl BtmcFetcher {
    pub fn new(url: impl Into<String>) -> Result<Self, PriceError> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent("gold-price-server/0.1")
            .build()
            .map_err(|e| PriceError::Fetch(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl PriceFetcher for BtmcFetcher {
    async fn fetch(&self) -> Result<Vec<PriceQuote>, PriceError> {
        let response = self
            .client
            .get(&self.url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| PriceError::Fetch(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(PriceError::Fetch(format!(
                "price API returned status {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| PriceError::Fetch(format!("invalid JSON body: {}", e)))?;

        let quotes = parse_btmc_payload(&body, Utc::now())?;
        tracing::debug!("Parsed {} quotes from BTMC", quotes.len());
        Ok(quotes)
    }

    fn name(&self) -> &str {
        "btmc"
    }
}

/// Convert a BTMC `DataList.Data` payload into quotes
///
/// Field keys are suffixed with the row number (`@n_3`, `@pb_3`, ...).
/// Rows without `@row` are skipped, unparsable prices become zero and an
/// unparsable date falls back to `now`.
pub fn parse_btmc_payload(payload: &Value, now: DateTime<Utc>) -> Result<Vec<PriceQuote>, PriceError> {
    let rows = payload
        .get("DataList")
        .and_then(|list| list.get("Data"))
        .and_then(Value::as_array)
        .ok_or_else(|| PriceError::Fetch("missing DataList.Data array".to_string()))?;

    let quotes: Vec<PriceQuote> = rows
        .iter()
        .take(MAX_ROWS)
        .filter_map(|row| parse_row(row, now))
        .collect();

    if quotes.is_empty() {
        return Err(PriceError::Fetch("no price rows in payload".to_string()));
    }

    Ok(quotes)
}

fn parse_row(row: &Value, now: DateTime<Utc>) -> Option<PriceQuote> {
    let number = match row.get("@row")? {
        Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };

    let field = |prefix: &str| -> String {
        row.get(format!("@{}_{}", prefix, number))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string()
    };

    let updated_at = parse_timestamp(&field("d")).unwrap_or(now);
    let buy_price = parse_price(row, &format!("@pb_{}", number));
    let sell_price = parse_price(row, &format!("@ps_{}", number));

    Some(
        PriceQuote::new(format!("gold_{}", number), field("n"))
            .with_id(number.clone())
            .with_grade(field("k"), field("h"))
            .with_prices(buy_price, sell_price)
            .with_company(COMPANY)
            .with_updated_at(updated_at),
    )
}

fn parse_price(row: &Value, key: &str) -> Decimal {
    match row.get(key) {
        Some(Value::String(s)) => Decimal::from_str(s.trim()).map(|d| d.trunc()).unwrap_or_default(),
        Some(Value::Number(n)) => Decimal::from_str(&n.to_string()).map(|d| d.trunc()).unwrap_or_default(),
        _ => Decimal::ZERO,
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let offset = FixedOffset::east_opt(VIETNAM_OFFSET_SECS)?;
    NaiveDateTime::parse_from_str(raw, DATE_FORMAT)
        .ok()?
        .and_local_timezone(offset)
        .single()
        .map(|local| local.with_timezone(&Utc))
}
