//! Decoding of graph-driver property values.
//!
//! The driver hands integers back either as plain JSON numbers or as
//! `{low, high}` pairs. Absent numeric data decodes to zero and absent text to
//! the empty string; none of these functions can fail.

use chrono::NaiveDate;
use serde_json::Value;

/// Plain numbers pass through, `{low, high}` pairs yield `low`, anything else is `0`.
pub fn decode_number(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::Object(map)) => match map.get("low") {
            Some(Value::Number(low)) => low.as_f64().unwrap_or(0.0),
            _ => 0.0,
        },
        _ => 0.0,
    }
}

/// Integer view of [`decode_number`]; fractional parts are truncated.
pub fn decode_integer(value: Option<&Value>) -> i64 {
    decode_number(value) as i64
}

/// Like [`decode_number`] but keeps "absent" distinguishable from zero.
pub fn decode_optional_number(value: Option<&Value>) -> Option<f64> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::Number(_)) => Some(decode_number(value)),
        Some(Value::Object(map)) if map.get("low").is_some_and(Value::is_number) => {
            Some(decode_number(value))
        }
        _ => None,
    }
}

/// Strings pass through, falsy input becomes `""`.
///
/// Numbers and `true` are rendered as text, and driver date objects
/// (`{year, month, day}`) become ISO dates.
pub fn decode_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) if n.as_f64() != Some(0.0) => n.to_string(),
        Some(Value::Bool(true)) => "true".to_string(),
        Some(Value::Object(map)) => decode_date(map).unwrap_or_default(),
        _ => String::new(),
    }
}

pub fn decode_string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| decode_string(Some(item)))
            .filter(|item| !item.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

fn decode_date(map: &serde_json::Map<String, Value>) -> Option<String> {
    let year = decode_integer(map.get("year"));
    let month = decode_integer(map.get("month"));
    let day = decode_integer(map.get("day"));
    let date = NaiveDate::from_ymd_opt(
        i32::try_from(year).ok()?,
        u32::try_from(month).ok()?,
        u32::try_from(day).ok()?,
    )?;
    Some(date.format("%Y-%m-%d").to_string())
}
