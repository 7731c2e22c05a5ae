//! Manual prefix-scan JSON field extraction: enough structure to pull the
//! handful of fields a ticker/depth frame needs, without building a DOM.
//! Numeric fields go straight to their binary representation via
//! `fast_float`, never through an intermediate `serde_json::Value`.

/// Extracts a quoted string value following `prefix` (which must include
/// the closing `":"` and opening quote, e.g. `"\"s\":\""`).
#[inline]
pub fn extract_quoted_str<'a>(data: &'a str, prefix: &str) -> Option<&'a str> {
    let start = data.find(prefix)?;
    let value_start = start + prefix.len();
    let end = data[value_start..].find('"')?;
    Some(&data[value_start..value_start + end])
}

/// Extracts a quoted decimal value (the common Binance-style
/// `"b":"50000.12"` numeric-as-string encoding).
#[inline]
pub fn extract_quoted_f64(data: &str, prefix: &str) -> Option<f64> {
    let raw = extract_quoted_str(data, prefix)?;
    fast_float::parse(raw).ok()
}

/// Extracts a bare (unquoted) decimal value, e.g. `"p":50000.12`.
#[inline]
pub fn extract_bare_f64(data: &str, prefix: &str) -> Option<f64> {
    let start = data.find(prefix)?;
    let value_start = start + prefix.len();
    let end = data[value_start..]
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == 'e' || c == 'E' || c == '+'))
        .unwrap_or(data.len() - value_start);
    fast_float::parse(&data[value_start..value_start + end]).ok()
}

#[inline]
pub fn extract_u64(data: &str, prefix: &str) -> Option<u64> {
    let start = data.find(prefix)?;
    let value_start = start + prefix.len();
    let end = data[value_start..]
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(data.len() - value_start);
    data[value_start..value_start + end].parse().ok()
}

#[inline]
pub fn extract_i64(data: &str, prefix: &str) -> Option<i64> {
    let start = data.find(prefix)?;
    let value_start = start + prefix.len();
    let end = data[value_start..]
        .find(|c: char| !c.is_ascii_digit() && c != '-')
        .unwrap_or(data.len() - value_start);
    data[value_start..value_start + end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_quoted_and_bare_numbers() {
        let msg = r#"{"s":"BTCUSDT","b":"50000.50","u":12345,"T":1700000000000}"#;
        assert_eq!(extract_quoted_str(msg, "\"s\":\""), Some("BTCUSDT"));
        assert_eq!(extract_quoted_f64(msg, "\"b\":\""), Some(50000.50));
        assert_eq!(extract_u64(msg, "\"u\":"), Some(12345));
        assert_eq!(extract_i64(msg, "\"T\":"), Some(1700000000000));
    }

    #[test]
    fn missing_prefix_returns_none() {
        let msg = r#"{"s":"BTCUSDT"}"#;
        assert_eq!(extract_quoted_f64(msg, "\"b\":\""), None);
    }
}
