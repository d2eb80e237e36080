pub mod gold_price;

pub use gold_price::{GoldPriceChangeset, GoldPriceRow, NewGoldPriceRow};
