pub mod price_quote;

pub use price_quote::{validate_batch, ManualAddRequest, PriceQuote, PriceQuoteInput};
