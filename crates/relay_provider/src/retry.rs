use std::time::Duration;

use serde_json::Value;

/// Ceiling on any server-suggested retry delay
const MAX_SERVER_DELAY: Duration = Duration::from_secs(30 * 60);

/// Extracts a server-suggested retry delay from an error body.
///
/// Looks for the standard `google.rpc.RetryInfo` detail
/// (`retryDelay: "45s"` or `{ "seconds": 45, "nanos": 0 }`), at any
/// nesting depth the Code-Assist error envelope uses.
pub fn server_suggested_delay(body: &str) -> Option<Duration> {
    let value: Value = serde_json::from_str(body).ok()?;
    find_retry_delay(&value)
}

fn find_retry_delay(value: &Value) -> Option<Duration> {
    match value {
        Value::Object(map) => {
            if map
                .get("@type")
                .and_then(Value::as_str)
                .is_some_and(|t| t.ends_with("google.rpc.RetryInfo"))
                && let Some(delay) = map.get("retryDelay")
            {
                return parse_delay(delay);
            }
            map.values().find_map(find_retry_delay)
        }
        Value::Array(items) => items.iter().find_map(find_retry_delay),
        _ => None,
    }
}

fn parse_delay(value: &Value) -> Option<Duration> {
    let delay = match value {
        // Proto3 JSON duration: "45s", "0.5s"
        Value::String(text) => {
            let seconds: f64 = text.strip_suffix('s')?.parse().ok()?;
            Duration::from_secs_f64(seconds.max(0.0))
        }
        Value::Object(map) => {
            let seconds = map.get("seconds").and_then(Value::as_u64).unwrap_or(0);
            let nanos = map.get("nanos").and_then(Value::as_u64).unwrap_or(0);
            Duration::new(seconds, nanos.min(999_999_999) as u32)
        }
        _ => return None,
    };
    Some(delay.min(MAX_SERVER_DELAY))
}

/// The delay actually used before a retry: the larger of the local backoff
/// and whatever the server asked for, capped at thirty minutes.
pub fn effective_delay(backoff: Duration, server: Option<Duration>) -> Duration {
    backoff.max(server.unwrap_or(Duration::ZERO)).min(MAX_SERVER_DELAY)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_parse_proto_string_delay() {
        let body = r#"{
            "error": {
                "code": 429,
                "details": [
                    { "@type": "type.googleapis.com/google.rpc.RetryInfo", "retryDelay": "45s" }
                ]
            }
        }"#;

        assert_eq!(server_suggested_delay(body), Some(Duration::from_secs(45)));
    }

    #[test]
    fn test_parse_object_delay() {
        let body = r#"{
            "error": {
                "details": [
                    { "@type": "type.googleapis.com/google.rpc.RetryInfo",
                      "retryDelay": { "seconds": 12, "nanos": 500000000 } }
                ]
            }
        }"#;

        assert_eq!(
            server_suggested_delay(body),
            Some(Duration::new(12, 500_000_000))
        );
    }

    #[test]
    fn test_missing_or_malformed_body() {
        assert_eq!(server_suggested_delay("not json"), None);
        assert_eq!(server_suggested_delay(r#"{"error":{}}"#), None);
    }

    #[test]
    fn test_effective_delay_takes_max_and_caps() {
        assert_eq!(
            effective_delay(Duration::from_secs(2), Some(Duration::from_secs(45))),
            Duration::from_secs(45)
        );
        assert_eq!(
            effective_delay(Duration::from_secs(60), Some(Duration::from_secs(45))),
            Duration::from_secs(60)
        );
        assert_eq!(
            effective_delay(Duration::from_secs(1), None),
            Duration::from_secs(1)
        );
        // Thirty-minute ceiling
        assert_eq!(
            effective_delay(Duration::from_secs(1), Some(Duration::from_secs(86_400))),
            Duration::from_secs(1800)
        );
    }
}
