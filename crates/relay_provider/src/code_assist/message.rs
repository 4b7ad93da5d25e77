use std::collections::HashMap;

use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use relay_domain::{ChatMessage, ChatRole, MessagePart};
use serde_json::{Value, json};
use tracing::debug;

use super::tier::{is_claude_model, is_gemini_3_pro};
use super::{CodeAssistStyle, ThinkingLevel};

/// Behavioral instruction appended when tools were supplied
const TOOL_ENABLED_INSTRUCTION: &str = "You have access to the declared tools. Call a tool when \
it is the correct way to make progress; answer directly when no tool applies. Never invent tool \
names or parameters that were not declared.";

/// Behavioral instruction appended when no tools were supplied
const TOOL_DISABLED_INSTRUCTION: &str = "No tools are available in this conversation. Do not \
emit tool or function calls; respond with text only.";

/// Extra instruction for Claude models when tools are present
const STRICT_PARAMETERS_INSTRUCTION: &str = "STRICT PARAMETERS: every tool call must match the \
declared JSON schema for that tool exactly. Supply every required property, use the declared \
types, and add nothing that the schema does not define.";

/// Vendor-supplied system prompt for the strongest model tiers
const VENDOR_SYSTEM_PROMPT: &str = "You are an expert coding assistant operating inside an \
editor. Be precise, ground every answer in the provided context, and prefer minimal, correct \
edits over speculation.";

/// Output of message conversion, plus the texts the session seed needs
pub struct ConvertedMessages {
    pub contents: Vec<Value>,
    pub system_instruction: Value,
    pub system_text: String,
    pub first_user_text: Option<String>,
}

/// Flattens the host messages into Code-Assist `contents` plus one
/// `systemInstruction` block.
pub fn convert_messages(
    messages: &[ChatMessage],
    model: &str,
    level: Option<ThinkingLevel>,
    has_tools: bool,
    _style: CodeAssistStyle,
) -> ConvertedMessages {
    let claude = is_claude_model(model);

    let system_texts: Vec<&str> = messages
        .iter()
        .filter(|message| message.role == ChatRole::System)
        .flat_map(|message| {
            message.parts.iter().filter_map(|part| match part {
                MessagePart::Text { text } => Some(text.as_str()),
                _ => None,
            })
        })
        .collect();
    let system_text = system_texts.join("\n");

    let mut instruction_parts: Vec<Value> = Vec::new();
    // The vendor prompt leads for Claude and the top Gemini tier
    if claude || (is_gemini_3_pro(model) && level == Some(ThinkingLevel::High)) {
        instruction_parts.push(json!({ "text": VENDOR_SYSTEM_PROMPT }));
    }
    instruction_parts.extend(
        system_texts
            .iter()
            .filter(|text| !text.is_empty())
            .map(|text| json!({ "text": text })),
    );
    if claude && has_tools {
        instruction_parts.push(json!({ "text": STRICT_PARAMETERS_INSTRUCTION }));
    }
    instruction_parts.push(json!({
        "text": if has_tools { TOOL_ENABLED_INSTRUCTION } else { TOOL_DISABLED_INSTRUCTION }
    }));

    let system_instruction = json!({ "role": "user", "parts": instruction_parts });

    let mut converter = Converter::default();
    let mut contents: Vec<Value> = Vec::new();
    for message in messages {
        match message.role {
            ChatRole::System => {}
            ChatRole::User => contents.push(converter.user_content(message)),
            ChatRole::Tool => contents.push(converter.tool_content(message)),
            ChatRole::Assistant => contents.extend(converter.assistant_contents(message)),
        }
    }

    if claude {
        contents = sanitize_claude_contents(contents);
    }

    let first_user_text = messages
        .iter()
        .find(|message| message.role == ChatRole::User)
        .map(|message| message.joined_text());

    ConvertedMessages { contents, system_instruction, system_text, first_user_text }
}

/// Stateful converter carrying the host-id to vendor-id tool-call mapping
#[derive(Default)]
struct Converter {
    /// Host tool-call id → vendor (marker) functionCall id
    tool_id_map: HashMap<String, String>,
    /// Host tool-call id → tool name, for functionResponse blocks
    tool_names: HashMap<String, String>,
}

impl Converter {
    fn user_content(&self, message: &ChatMessage) -> Value {
        let parts: Vec<Value> = message
            .parts
            .iter()
            .filter_map(|part| match part {
                MessagePart::Text { text } => Some(json!({ "text": text })),
                _ => None,
            })
            .collect();
        json!({ "role": "user", "parts": parts })
    }

    fn tool_content(&self, message: &ChatMessage) -> Value {
        let parts: Vec<Value> = message
            .parts
            .iter()
            .filter_map(|part| match part {
                MessagePart::ToolResult { call_id, name, content } => {
                    let mut response = json!({
                        "name": self.tool_names.get(call_id).unwrap_or(name),
                        "response": { "output": content },
                    });
                    if let Some(vendor_id) = self.tool_id_map.get(call_id) {
                        response["id"] = Value::String(vendor_id.clone());
                    }
                    Some(json!({ "functionResponse": response }))
                }
                _ => None,
            })
            .collect();
        json!({ "role": "user", "parts": parts })
    }

    /// An assistant turn converts either from its stateful marker (raw
    /// vendor content replayed verbatim, thought signatures intact) or
    /// from its visible parts.
    fn assistant_contents(&mut self, message: &ChatMessage) -> Vec<Value> {
        let marker = message.parts.iter().find_map(|part| match part {
            MessagePart::StatefulMarker { data } => Some(data.as_str()),
            _ => None,
        });

        if let Some(data) = marker
            && let Some(raw_contents) = decode_marker(data)
        {
            self.pair_tool_ids(message, &raw_contents);
            return raw_contents;
        }

        let parts: Vec<Value> = message
            .parts
            .iter()
            .filter_map(|part| match part {
                MessagePart::Text { text } => Some(json!({ "text": text })),
                MessagePart::Thought { text, signature } => {
                    let mut thought = json!({ "text": text, "thought": true });
                    if let Some(signature) = signature {
                        thought["thoughtSignature"] = Value::String(signature.clone());
                    }
                    Some(thought)
                }
                MessagePart::ToolCall { id, name, arguments } => {
                    self.tool_names.insert(id.clone(), name.clone());
                    Some(json!({ "functionCall": { "id": id, "name": name, "args": arguments } }))
                }
                _ => None,
            })
            .collect();
        vec![json!({ "role": "model", "parts": parts })]
    }

    /// Pairs the message's tool-call parts with the marker's functionCall
    /// parts by index, so later tool results reinject the vendor's ids.
    fn pair_tool_ids(&mut self, message: &ChatMessage, raw_contents: &[Value]) {
        let host_calls: Vec<(&String, &String)> = message
            .parts
            .iter()
            .filter_map(|part| match part {
                MessagePart::ToolCall { id, name, .. } => Some((id, name)),
                _ => None,
            })
            .collect();

        let vendor_ids: Vec<Option<String>> = raw_contents
            .iter()
            .filter_map(|content| content.get("parts"))
            .filter_map(Value::as_array)
            .flatten()
            .filter_map(|part| part.get("functionCall"))
            .map(|call| call.get("id").and_then(Value::as_str).map(str::to_string))
            .collect();

        for (index, (host_id, name)) in host_calls.into_iter().enumerate() {
            self.tool_names.insert(host_id.clone(), name.clone());
            if let Some(Some(vendor_id)) = vendor_ids.get(index) {
                self.tool_id_map.insert(host_id.clone(), vendor_id.clone());
            }
        }
    }
}

/// Decodes the base64 blob back into the raw `Content[]` it carries
fn decode_marker(data: &str) -> Option<Vec<Value>> {
    let bytes = BASE64_STANDARD
        .decode(data)
        .map_err(|error| debug!(%error, "stateful marker is not valid base64"))
        .ok()?;
    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|error| debug!(%error, "stateful marker is not valid JSON"))
        .ok()?;
    match value {
        Value::Array(contents) => Some(contents),
        single @ Value::Object(_) => Some(vec![single]),
        _ => None,
    }
}

/// Encodes raw server contents into the marker blob for the next turn
pub fn encode_marker(contents: &[Value]) -> String {
    BASE64_STANDARD.encode(serde_json::to_vec(contents).unwrap_or_default())
}

/// Claude content rules: adjacent same-role messages merge, text parts
/// within a message merge into one (thought text and signature preserved
/// separately), empty text parts drop, and thought parts sort first.
fn sanitize_claude_contents(contents: Vec<Value>) -> Vec<Value> {
    let mut merged: Vec<Value> = Vec::with_capacity(contents.len());
    for content in contents {
        let role = content
            .get("role")
            .and_then(Value::as_str)
            .unwrap_or("user")
            .to_string();
        let same_role = merged
            .last()
            .and_then(|previous| previous.get("role"))
            .and_then(Value::as_str)
            == Some(role.as_str());

        if same_role && let Some(previous) = merged.last_mut() {
            let mut combined = previous
                .get("parts")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            combined.extend(
                content
                    .get("parts")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default(),
            );
            previous["parts"] = Value::Array(combined);
        } else {
            merged.push(content);
        }
    }

    merged
        .into_iter()
        .map(|mut content| {
            let Some(Value::Array(parts)) = content.get("parts").cloned() else {
                return content;
            };

            let mut thoughts: Vec<Value> = Vec::new();
            let mut texts: Vec<String> = Vec::new();
            let mut others: Vec<Value> = Vec::new();
            for part in parts {
                let is_thought = part.get("thought").and_then(Value::as_bool) == Some(true);
                if is_thought {
                    thoughts.push(part);
                } else if let Some(text) = part.get("text").and_then(Value::as_str) {
                    if !text.is_empty() {
                        texts.push(text.to_string());
                    }
                } else {
                    others.push(part);
                }
            }

            let mut rebuilt = thoughts;
            if !texts.is_empty() {
                rebuilt.push(json!({ "text": texts.join("") }));
            }
            rebuilt.extend(others);
            content["parts"] = Value::Array(rebuilt);
            content
        })
        .collect()
}
