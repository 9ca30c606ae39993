use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

use crate::error::{AppError, Result};

/// Format the exchange endpoint uses for per-game update times.
pub const REMOTE_UPDATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Integer view of a JSON number or numeric string. Fractions are rounded.
pub fn value_to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.round() as i64)),
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed.parse::<i64>().ok().or_else(|| {
                trimmed
                    .parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(|f| f.round() as i64)
            })
        }
        _ => None,
    }
}

/// Loose truthiness used by the item dumps, which mix booleans, strings and numbers.
pub fn value_to_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => matches!(s.trim().to_lowercase().as_str(), "true" | "yes" | "1"),
        _ => false,
    }
}

/// History responses are keyed by the requested item id: `{"4151": [[ts, price, vol], ...]}`.
pub fn history_rows(payload: &Value, item_id: u32) -> Option<&Value> {
    let object = payload.as_object()?;
    object
        .get(&item_id.to_string())
        .or_else(|| (object.len() == 1).then(|| object.values().next()).flatten())
}

/// Flatten an OSRS timeseries response (`{"data": [{"timestamp", "avgHighPrice", ..}]}`) into
/// `[timestamp, price, volume?]` rows. The price is the average high, falling back to the average
/// low; the volume sums both sides. Entries with no trades on either side are dropped.
pub fn timeseries_rows(payload: &Value) -> Option<Vec<Value>> {
    let entries = payload.get("data")?.as_array()?;
    let rows = entries
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|entry| {
            let timestamp = entry.get("timestamp")?.clone();
            let price = entry
                .get("avgHighPrice")
                .and_then(value_to_i64)
                .or_else(|| entry.get("avgLowPrice").and_then(value_to_i64))?;
            let volumes: Vec<i64> = ["highPriceVolume", "lowPriceVolume"]
                .iter()
                .filter_map(|key| entry.get(*key).and_then(value_to_i64))
                .collect();
            let row = if volumes.is_empty() {
                Value::Array(vec![timestamp, price.into()])
            } else {
                Value::Array(vec![timestamp, price.into(), volumes.iter().sum::<i64>().into()])
            };
            Some(row)
        })
        .collect();
    Some(rows)
}

pub fn parse_remote_update_time(raw: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), REMOTE_UPDATE_FORMAT)?;
    Ok(naive.and_utc())
}

/// Newest `*Time` field in the OSRS realtime feed (`{"data": {"<id>": {"highTime": ..}}}`).
pub fn latest_realtime_trade(payload: &Value) -> Result<Option<DateTime<Utc>>> {
    let data = payload
        .get("data")
        .and_then(Value::as_object)
        .ok_or_else(|| AppError::message("Realtime payload is missing the `data` object"))?;

    let newest = data
        .values()
        .filter_map(Value::as_object)
        .flat_map(|fields| {
            fields
                .iter()
                .filter(|(key, _)| key.contains("Time"))
                .filter_map(|(_, value)| value.as_i64())
        })
        .max();

    Ok(newest.and_then(|secs| DateTime::from_timestamp(secs, 0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_loose_integers() {
        assert_eq!(value_to_i64(&json!(42)), Some(42));
        assert_eq!(value_to_i64(&json!(41.6)), Some(42));
        assert_eq!(value_to_i64(&json!(" 1200 ")), Some(1200));
        assert_eq!(value_to_i64(&json!("12.4")), Some(12));
        assert_eq!(value_to_i64(&json!(null)), None);
        assert_eq!(value_to_i64(&json!("abc")), None);
    }

    #[test]
    fn reads_loose_booleans() {
        assert!(value_to_bool(&json!(true)));
        assert!(value_to_bool(&json!("true")));
        assert!(value_to_bool(&json!(1)));
        assert!(!value_to_bool(&json!(0)));
        assert!(!value_to_bool(&json!(null)));
    }

    #[test]
    fn unwraps_history_envelope() {
        let payload = json!({"4151": [[1700000000000i64, 1500000, 12]]});
        assert!(history_rows(&payload, 4151).unwrap().is_array());
        // Single-key responses are accepted even when the key is formatted differently.
        assert!(history_rows(&payload, 1).is_some());
        assert!(history_rows(&json!({"1": [], "2": []}), 3).is_none());
        assert!(history_rows(&json!([]), 1).is_none());
    }

    #[test]
    fn flattens_timeseries_entries() {
        let payload = json!({
            "data": [
                {"timestamp": 1700000000, "avgHighPrice": 105, "avgLowPrice": 100, "highPriceVolume": 4, "lowPriceVolume": 6},
                {"timestamp": 1700000300, "avgHighPrice": null, "avgLowPrice": 99, "highPriceVolume": 0, "lowPriceVolume": 2},
                {"timestamp": 1700000600, "avgHighPrice": null, "avgLowPrice": null, "highPriceVolume": 0, "lowPriceVolume": 0},
                {"timestamp": 1700000900, "avgHighPrice": 101}
            ],
            "itemId": 4151
        });
        let rows = timeseries_rows(&payload).unwrap();
        assert_eq!(
            rows,
            vec![
                json!([1700000000, 105, 10]),
                json!([1700000300, 99, 2]),
                json!([1700000900, 101]),
            ]
        );
        assert!(timeseries_rows(&json!({"4151": []})).is_none());
    }

    #[test]
    fn parses_remote_update_time() {
        let parsed = parse_remote_update_time("2024-03-05T12:30:15.250Z").unwrap();
        assert_eq!(parsed.timestamp_millis(), 1_709_641_815_250);
        assert!(parse_remote_update_time("yesterday").is_err());
    }

    #[test]
    fn finds_newest_realtime_trade() {
        let payload = json!({
            "data": {
                "2": {"high": 150, "highTime": 1700000100, "low": 148, "lowTime": 1700000050},
                "6": {"high": 1, "highTime": null, "low": 1, "lowTime": 1700000200}
            }
        });
        let newest = latest_realtime_trade(&payload).unwrap().unwrap();
        assert_eq!(newest.timestamp(), 1_700_000_200);

        assert!(latest_realtime_trade(&json!({})).is_err());
    }
}
