//! Rendering helpers for RPC results

use chrono::{Local, TimeZone};
use colored::{ColoredString, Colorize};
use serde_json::Value;

const PLACEHOLDER: &str = "-";

/// Field as display text; null or missing renders as `-`
pub fn text(value: &Value, key: &str) -> String {
    match value.get(key) {
        None | Some(Value::Null) => PLACEHOLDER.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Epoch milliseconds in local time
pub fn timestamp(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_i64)
        .and_then(|ms| Local.timestamp_millis_opt(ms).single())
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| PLACEHOLDER.to_string())
}

pub fn duration(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_i64)
        .map(format_duration)
        .unwrap_or_else(|| PLACEHOLDER.to_string())
}

pub fn format_duration(ms: i64) -> String {
    let secs = ms.max(0) / 1000;
    match secs {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{}m {:02}s", s / 60, s % 60),
        s => format!("{}h {:02}m", s / 3600, (s % 3600) / 60),
    }
}

pub fn status(value: &str) -> ColoredString {
    match value {
        "SUCCESS" | "COMPLETED" | "IDLE" => value.green(),
        "FAILED" | "CANCELLED" => value.red().bold(),
        "RETRY_PENDING" => value.yellow(),
        "PREPARING" | "BACKING_UP" | "RESTORING" => value.cyan(),
        _ => value.normal(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(900), "0s");
        assert_eq!(format_duration(42_000), "42s");
        assert_eq!(format_duration(125_000), "2m 05s");
        assert_eq!(format_duration(3_720_000), "1h 02m");
        assert_eq!(format_duration(-5), "0s");
    }

    #[test]
    fn test_missing_fields_render_placeholder() {
        let v = json!({ "name": "web", "schedule": null, "max_retries": 3 });
        assert_eq!(text(&v, "name"), "web");
        assert_eq!(text(&v, "schedule"), "-");
        assert_eq!(text(&v, "absent"), "-");
        assert_eq!(text(&v, "max_retries"), "3");
        assert_eq!(timestamp(&v, "schedule"), "-");
        assert_eq!(duration(&v, "absent"), "-");
    }
}
