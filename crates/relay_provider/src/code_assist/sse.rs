use serde_json::{Map, Value};

/// Incremental server-sent-events parser.
///
/// Bytes go in via [`SseParser::push`]; complete event payloads come out.
/// An event is the concatenation of its `data:` lines, dispatched on the
/// blank line that ends the event. `[DONE]` is surfaced as
/// [`SseEvent::Done`]. Parsing state survives arbitrary chunk boundaries,
/// so the network layer can feed whatever the socket hands it.
#[derive(Default)]
pub struct SseParser {
    /// Unterminated trailing line from the previous chunk
    partial_line: String,
    /// `data:` payloads of the event currently being assembled
    data_lines: Vec<String>,
}

/// One parsed SSE event
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    Data(String),
    Done,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk, returning every event completed by it
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let text = String::from_utf8_lossy(chunk);
        let mut events = Vec::new();

        for ch in text.chars() {
            if ch == '\n' {
                let line = std::mem::take(&mut self.partial_line);
                let line = line.strip_suffix('\r').unwrap_or(&line).to_string();
                if line.is_empty() {
                    if let Some(event) = self.flush_event() {
                        events.push(event);
                    }
                } else if let Some(data) = line.strip_prefix("data:") {
                    self.data_lines.push(data.strip_prefix(' ').unwrap_or(data).to_string());
                }
                // Comment lines and other fields are ignored
            } else {
                self.partial_line.push(ch);
            }
        }
        events
    }

    /// Dispatches the event assembled so far, if any
    pub fn flush_event(&mut self) -> Option<SseEvent> {
        if self.data_lines.is_empty() {
            return None;
        }
        let payload = std::mem::take(&mut self.data_lines).join("\n");
        if payload == "[DONE]" {
            Some(SseEvent::Done)
        } else {
            Some(SseEvent::Data(payload))
        }
    }
}

/// Converts snake_case keys to camelCase recursively and unwraps the
/// Code-Assist `response` envelope when present. Applied identically to
/// streaming events and non-streaming bodies.
pub fn normalize_response(value: Value) -> Value {
    let normalized = camelize(value);
    match normalized {
        Value::Object(mut map) if map.contains_key("response") => {
            // The envelope carries the payload under `response`
            map.remove("response").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn camelize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let converted: Map<String, Value> = map
                .into_iter()
                .map(|(key, value)| (snake_to_camel(&key), camelize(value)))
                .collect();
            Value::Object(converted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(camelize).collect()),
        other => other,
    }
}

fn snake_to_camel(key: &str) -> String {
    if !key.contains('_') {
        return key.to_string();
    }
    let mut result = String::with_capacity(key.len());
    let mut upper_next = false;
    for (index, ch) in key.chars().enumerate() {
        if ch == '_' && index != 0 {
            upper_next = true;
        } else if upper_next {
            result.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            result.push(ch);
        }
    }
    result
}
