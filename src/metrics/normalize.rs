use crate::error::BidError;
use crate::metrics::ReportValue;

/// Parses a revenue cell, stripping grouping separators first.
pub fn parse_decimal(field: &'static str, value: &ReportValue) -> Result<f64, BidError> {
    let parsed = match value {
        ReportValue::Number(n) => Some(*n),
        ReportValue::Text(raw) => {
            let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
            if cleaned.is_empty() || cleaned == "--" {
                Some(0.0)
            } else {
                cleaned.parse::<f64>().ok()
            }
        }
    };
    match parsed {
        Some(n) if n.is_finite() && n >= 0.0 => Ok(n),
        _ => Err(BidError::InvalidNumericData {
            field,
            raw: raw_text(value),
        }),
    }
}

/// Clicks and conversions. Conversions may be fractional under data-driven
/// attribution, so counts stay `f64`.
pub fn parse_count(field: &'static str, value: &ReportValue) -> Result<f64, BidError> {
    parse_decimal(field, value)
}

fn raw_text(value: &ReportValue) -> String {
    match value {
        ReportValue::Number(n) => n.to_string(),
        ReportValue::Text(raw) => raw.clone(),
    }
}
