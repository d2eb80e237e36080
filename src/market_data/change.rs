use crate::models::PriceQuote;

/// Whether `candidate` differs from `previous`
///
/// Comparison is positional over every field: a length mismatch or any
/// difference at the same index counts as a change, so the same quotes in a
/// different order are reported as changed.
pub fn have_prices_changed(previous: &[PriceQuote], candidate: &[PriceQuote]) -> bool {
    if previous.len() != candidate.len() {
        return true;
    }

    previous
        .iter()
        .zip(candidate)
        .any(|(last, next)| last != next)
}
