//! Stateless parser for Massive WebSocket frames.
//!
//! The socket delivers either a JSON array of event objects or a single
//! event object. Every object carries an `"ev"` tag:
//!
//! - `"A"` / `"AM"`: second / minute aggregate for one symbol
//! - `"status"`: connection and auth lifecycle
//! - anything else is forwarded as `Unknown` so new event types never
//!   break the read loop

use serde_json::Value;

use crate::massive::types::FeedMessage;

pub fn parse_frame(raw: &str) -> anyhow::Result<Vec<FeedMessage>> {
    let json: Value = serde_json::from_str(raw)?;

    let items: Vec<Value> = match json {
        Value::Array(items) => items,
        other => vec![other],
    };

    Ok(items.into_iter().map(classify).collect())
}

fn classify(v: Value) -> FeedMessage {
    let ev = v.get("ev").and_then(Value::as_str).unwrap_or_default();
    match ev {
        "A" | "AM" => FeedMessage::SecondAgg(v),
        "status" => FeedMessage::Status {
            status: v
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            message: v
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        },
        _ => FeedMessage::Unknown(v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aggregate_array() {
        let raw = r#"[
            {"ev":"A","sym":"AGQ","c":101.2,"v":1000,"e":1700000000123},
            {"ev":"A","sym":"MSFT","c":412.0,"v":2000,"e":1700000000123}
        ]"#;
        let msgs = parse_frame(raw).unwrap();
        assert_eq!(msgs.len(), 2);
        assert!(matches!(msgs[0], FeedMessage::SecondAgg(_)));
        assert!(matches!(msgs[1], FeedMessage::SecondAgg(_)));
    }

    #[test]
    fn parses_status_object() {
        let raw = r#"[{"ev":"status","status":"auth_success","message":"authenticated"}]"#;
        let msgs = parse_frame(raw).unwrap();
        assert_eq!(msgs.len(), 1);
        match &msgs[0] {
            FeedMessage::Status { status, message } => {
                assert_eq!(status, "auth_success");
                assert_eq!(message, "authenticated");
            }
            other => panic!("expected status, got {other:?}"),
        }
    }

    #[test]
    fn bare_object_frame_is_accepted() {
        let raw = r#"{"ev":"A","sym":"AGQ","c":10.0}"#;
        let msgs = parse_frame(raw).unwrap();
        assert_eq!(msgs.len(), 1);
        assert!(matches!(msgs[0], FeedMessage::SecondAgg(_)));
    }

    #[test]
    fn unknown_events_fall_through() {
        let raw = r#"[{"ev":"T","sym":"AGQ","p":10.0}]"#;
        let msgs = parse_frame(raw).unwrap();
        assert!(matches!(msgs[0], FeedMessage::Unknown(_)));
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(parse_frame("not json").is_err());
    }
}
