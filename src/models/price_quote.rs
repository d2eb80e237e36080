use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::PriceError;

/// One priced item as published to readers, subscribers and the durable store.
///
/// `quote_type` (serialized as `type`) is the business key used for upserts.
/// `id` is opaque and may differ from it; lookups accept either.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PriceQuote {
    #[serde(default)]
    pub id: String,

    #[serde(rename = "type")]
    pub quote_type: String,

    pub name: String,

    #[serde(default)]
    pub karat: String,

    #[serde(default)]
    pub purity: String,

    #[serde(default, with = "rust_decimal::serde::float")]
    #[schema(value_type = f64, example = 11750000)]
    pub buy_price: Decimal,

    #[serde(default, with = "rust_decimal::serde::float")]
    #[schema(value_type = f64, example = 12050000)]
    pub sell_price: Decimal,

    #[serde(default)]
    pub company: String,

    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl PriceQuote {
    /// Create a quote with the two required fields set
    pub fn new(quote_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            quote_type: quote_type.into(),
            name: name.into(),
            karat: String::new(),
            purity: String::new(),
            buy_price: Decimal::ZERO,
            sell_price: Decimal::ZERO,
            company: String::new(),
            updated_at: None,
            created_at: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_prices(mut self, buy_price: Decimal, sell_price: Decimal) -> Self {
        self.buy_price = buy_price;
        self.sell_price = sell_price;
        self
    }

    pub fn with_grade(mut self, karat: impl Into<String>, purity: impl Into<String>) -> Self {
        self.karat = karat.into();
        self.purity = purity.into();
        self
    }

    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = company.into();
        self
    }

    pub fn with_updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = Some(updated_at);
        self
    }

    /// True when `key` names this quote by id or by type
    pub fn matches_key(&self, key: &str) -> bool {
        self.id == key || self.quote_type == key
    }

    /// Check the fields a manually supplied quote must carry
    pub fn validate(&self) -> Result<(), PriceError> {
        if self.quote_type.trim().is_empty() {
            return Err(PriceError::Validation("missing required field: type".to_string()));
        }
        if self.name.trim().is_empty() {
            return Err(PriceError::Validation("missing required field: name".to_string()));
        }
        Ok(())
    }
}

/// Validate a whole batch before it is allowed into the pipeline
pub fn validate_batch(quotes: &[PriceQuote]) -> Result<(), PriceError> {
    if quotes.is_empty() {
        return Err(PriceError::Validation("no prices provided".to_string()));
    }
    quotes.iter().try_for_each(PriceQuote::validate)
}

/// Loosely typed quote accepted by the manual add endpoint.
///
/// Every field is optional so a missing `type` or `name` surfaces as a
/// validation error instead of a body parse failure.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct PriceQuoteInput {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub quote_type: Option<String>,
    pub name: Option<String>,
    pub karat: Option<String>,
    pub purity: Option<String>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    #[schema(value_type = Option<f64>, example = 11750000)]
    pub buy_price: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    #[schema(value_type = Option<f64>, example = 12050000)]
    pub sell_price: Option<Decimal>,
    pub company: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<PriceQuoteInput> for PriceQuote {
    type Error = PriceError;

    fn try_from(input: PriceQuoteInput) -> Result<Self, Self::Error> {
        let quote = PriceQuote {
            id: input.id.unwrap_or_default(),
            quote_type: input.quote_type.unwrap_or_default(),
            name: input.name.unwrap_or_default(),
            karat: input.karat.unwrap_or_default(),
            purity: input.purity.unwrap_or_default(),
            buy_price: input.buy_price.unwrap_or_default(),
            sell_price: input.sell_price.unwrap_or_default(),
            company: input.company.unwrap_or_default(),
            updated_at: input.updated_at,
            created_at: None,
        };
        quote.validate()?;
        Ok(quote)
    }
}

/// Body of a manual add: a single quote or an array of quotes
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum ManualAddRequest {
    Batch(Vec<PriceQuoteInput>),
    Single(PriceQuoteInput),
}

impl ManualAddRequest {
    /// Convert into validated quotes, rejecting the whole request on the first bad entry
    pub fn into_quotes(self) -> Result<Vec<PriceQuote>, PriceError> {
        let inputs = match self {
            ManualAddRequest::Batch(inputs) => inputs,
            ManualAddRequest::Single(input) => vec![input],
        };

        if inputs.is_empty() {
            return Err(PriceError::Validation("no prices provided".to_string()));
        }

        inputs.into_iter().map(PriceQuote::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_wire_format_uses_snake_case_and_type_key() {
        let quote = PriceQuote::new("gold_1", "SJC")
            .with_id("1")
            .with_prices(dec!(100), dec!(110));

        let json = serde_json::to_value(&quote).unwrap();

        assert_eq!(json["type"], "gold_1");
        assert_eq!(json["id"], "1");
        assert_eq!(json["buy_price"].as_f64(), Some(100.0));
        assert_eq!(json["sell_price"].as_f64(), Some(110.0));
        assert!(json.get("quote_type").is_none());
        assert!(json.get("updated_at").is_some());
        assert!(json.get("created_at").is_some());
    }

    #[test]
    fn test_decode_accepts_integer_prices() {
        let json = r#"[{"type":"gold_7","name":"SJC","buy_price":12020000,"sell_price":12220000}]"#;
        let quotes: Vec<PriceQuote> = serde_json::from_str(json).unwrap();

        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].buy_price, dec!(12020000));
        assert_eq!(quotes[0].sell_price, dec!(12220000));
        assert_eq!(quotes[0].id, "");
        assert!(quotes[0].updated_at.is_none());
    }

    #[test]
    fn test_matches_key_by_id_or_type() {
        let quote = PriceQuote::new("gold_3", "BTMC").with_id("3");

        assert!(quote.matches_key("3"));
        assert!(quote.matches_key("gold_3"));
        assert!(!quote.matches_key("gold_4"));
    }

    #[test]
    fn test_manual_request_single_object() {
        let request: ManualAddRequest =
            serde_json::from_str(r#"{"type":"gold_9","name":"Ring","buy_price":1}"#).unwrap();

        let quotes = request.into_quotes().unwrap();
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].quote_type, "gold_9");
        assert_eq!(quotes[0].buy_price, dec!(1));
    }

    #[test]
    fn test_manual_request_array() {
        let request: ManualAddRequest = serde_json::from_str(
            r#"[{"type":"gold_1","name":"A"},{"type":"gold_2","name":"B"}]"#,
        )
        .unwrap();

        let quotes = request.into_quotes().unwrap();
        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes[1].name, "B");
    }

    #[test]
    fn test_manual_request_missing_type_is_validation_error() {
        let request: ManualAddRequest =
            serde_json::from_str(r#"{"name":"No type","buy_price":100}"#).unwrap();

        let err = request.into_quotes().unwrap_err();
        assert!(err.is_validation_error());
    }

    #[test]
    fn test_manual_request_empty_array_rejected() {
        let request: ManualAddRequest = serde_json::from_str("[]").unwrap();
        assert!(request.into_quotes().unwrap_err().is_validation_error());
    }

    #[test]
    fn test_validate_batch() {
        assert!(validate_batch(&[]).is_err());
        assert!(validate_batch(&[PriceQuote::new("gold_1", "")]).is_err());
        assert!(validate_batch(&[PriceQuote::new("gold_1", "SJC")]).is_ok());
    }
}
