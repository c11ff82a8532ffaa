//! Price and count parsing for free-form button and label text.

use once_cell::sync::Lazy;
use regex::Regex;

// Optional "$", integer part (plain or with thousands commas), optional decimals.
static PRICE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$?\s*(\d{1,3}(?:,\d{3})+|\d+)(?:\.(\d+))?").expect("price regex is valid")
});

static COUNT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("count regex is valid"));

/// First whole number in `text`, e.g. a basket badge reading "3 items"
pub fn parse_count(text: &str) -> Option<u64> {
    COUNT_RE.find(text)?.as_str().parse().ok()
}

/// First price-looking number in `text`, if any
pub fn parse_price(text: &str) -> Option<f64> {
    let caps = PRICE_RE.captures(text)?;
    let whole = caps.get(1)?.as_str().replace(',', "");
    let number = match caps.get(2) {
        Some(frac) => format!("{whole}.{}", frac.as_str()),
        None => whole,
    };
    number.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Price in `text`, or `0.0` when nothing matches
pub fn extract_price(text: &str) -> f64 {
    parse_price(text).unwrap_or(0.0)
}

/// Try each text source in order and return the first match.
///
/// Typical order: the add control's own label, then its container's text.
pub fn extract_price_from<I, S>(sources: I) -> f64
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    sources
        .into_iter()
        .find_map(|s| parse_price(s.as_ref()))
        .unwrap_or(0.0)
}
