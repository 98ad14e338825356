use chrono::Utc;
use serde_json::Value;

/// A normalized per-second market update.
///
/// Provider schemas drift between versions, so normalization deliberately
/// probes a set of well-known key aliases instead of binding to one shape.
/// A `Tick` is only produced when a symbol and a positive price are found.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    /// Uppercase ticker symbol.
    pub symbol: String,
    /// Last trade / close price. Always > 0.
    pub price: f64,
    /// Aggregate volume for the window. May be zero.
    pub volume: f64,
    /// Event time, milliseconds since epoch.
    pub ts_ms: u64,
}

const SYMBOL_KEYS: &[&str] = &["sym", "Sym", "symbol", "Symbol", "ticker", "Ticker", "T"];
const PRICE_KEYS: &[&str] = &["c", "C", "close", "Close", "price", "Price", "p", "P"];
const VOLUME_KEYS: &[&str] = &["v", "V", "volume", "Volume"];
const TS_KEYS: &[&str] = &["e", "E", "end", "End", "t", "T", "timestamp", "Timestamp"];

impl Tick {
    /// Extract a tick from an arbitrary provider payload.
    ///
    /// Timestamps below 10^12 are treated as seconds, otherwise as
    /// milliseconds. A missing timestamp falls back to the current time.
    pub fn from_value(v: &Value) -> Option<Tick> {
        let obj = v.as_object()?;

        let symbol = pick_str(obj, SYMBOL_KEYS);
        let price = pick_f64(obj, PRICE_KEYS);
        let volume = pick_f64(obj, VOLUME_KEYS);
        let raw_ts = pick_i64(obj, TS_KEYS);

        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() || price <= 0.0 {
            return None;
        }

        let ts_ms = if raw_ts > 0 {
            if raw_ts < 1_000_000_000_000 {
                raw_ts as u64 * 1_000
            } else {
                raw_ts as u64
            }
        } else {
            Utc::now().timestamp_millis().max(0) as u64
        };

        Some(Tick {
            symbol,
            price,
            volume,
            ts_ms,
        })
    }
}

fn pick_str(obj: &serde_json::Map<String, Value>, keys: &[&str]) -> String {
    for k in keys {
        if let Some(Value::String(s)) = obj.get(*k) {
            return s.clone();
        }
    }
    String::new()
}

fn pick_f64(obj: &serde_json::Map<String, Value>, keys: &[&str]) -> f64 {
    for k in keys {
        if let Some(v) = obj.get(*k) {
            if let Some(f) = v.as_f64() {
                return f;
            }
        }
    }
    0.0
}

fn pick_i64(obj: &serde_json::Map<String, Value>, keys: &[&str]) -> i64 {
    for k in keys {
        if let Some(v) = obj.get(*k) {
            if let Some(i) = v.as_i64() {
                return i;
            }
            if let Some(f) = v.as_f64() {
                return f as i64;
            }
        }
    }
    0
}
