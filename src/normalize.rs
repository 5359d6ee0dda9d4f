use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref UNIT_SUFFIX: Regex =
        Regex::new(r"(?i)^(\d+(?:\.\d+)?)\s*([kmb])$").expect("unit suffix regex");
    static ref MAN_SUFFIX: Regex = Regex::new(r"^(\d+(?:\.\d+)?)\s*만").expect("man suffix regex");
    static ref EOK_SUFFIX: Regex = Regex::new(r"^(\d+(?:\.\d+)?)\s*억").expect("eok suffix regex");
    static ref LEADING_DIGITS: Regex = Regex::new(r"^\d+").expect("leading digits regex");
}

/// Convert a scraped count such as `"1,234"`, `"12.3K"` or `"5만"` into an integer.
///
/// Only one magnitude suffix is honoured per call, tried in the order K/M/B, 만, 억.
/// Anything unparseable yields `0`.
pub fn normalize_count(raw: &str) -> u64 {
    let cleaned = raw.replace(',', "");
    let cleaned = cleaned.trim();

    if let Some(caps) = UNIT_SUFFIX.captures(cleaned) {
        let exponent = match caps[2].to_ascii_lowercase().as_str() {
            "k" => 3,
            "m" => 6,
            _ => 9,
        };
        return scale_decimal(&caps[1], exponent);
    }
    if let Some(caps) = MAN_SUFFIX.captures(cleaned) {
        return scale_decimal(&caps[1], 4);
    }
    if let Some(caps) = EOK_SUFFIX.captures(cleaned) {
        return scale_decimal(&caps[1], 8);
    }

    LEADING_DIGITS
        .find(cleaned)
        .map(|m| m.as_str().parse::<u64>().unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Multiply a decimal literal by `10^exponent` and floor, without going through
/// floating point (`2.3 * 1000.0` is `2299.999..`).
fn scale_decimal(literal: &str, exponent: usize) -> u64 {
    let (whole, fraction) = literal.split_once('.').unwrap_or((literal, ""));

    let mut digits = String::with_capacity(whole.len() + exponent);
    digits.push_str(whole);
    digits.extend(fraction.chars().chain(std::iter::repeat('0')).take(exponent));

    digits.parse::<u64>().unwrap_or(u64::MAX)
}
