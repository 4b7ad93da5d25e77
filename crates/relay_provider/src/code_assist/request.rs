use relay_domain::{
    GenerationOptions, ReasoningEffort, ToolChoiceMode, ToolDeclaration,
};
use serde_json::{Map, Value, json};

use super::message::ConvertedMessages;
use super::schema::{clean_schema, sanitize_tool_name};
use super::tier::{TieredModel, is_claude_opus, is_gemini_3, is_gemini_3_pro, is_image_model};
use super::CodeAssistStyle;
use crate::AdapterError;

/// Output token ceilings the server enforces per family
const GEMINI_3_PRO_MAX_OUTPUT: u32 = 65_535;
const CLAUDE_OPUS_MAX_OUTPUT: u32 = 64_000;

/// Claude Opus thinking budgets by requested effort
fn opus_thinking_budget(effort: Option<ReasoningEffort>) -> Option<u32> {
    match effort {
        Some(ReasoningEffort::Low) | Some(ReasoningEffort::Medium) => Some(8_192),
        Some(ReasoningEffort::High) | Some(ReasoningEffort::XHigh) | None => Some(32_768),
        Some(ReasoningEffort::Minimal) | Some(ReasoningEffort::None) => None,
    }
}

/// Builds the full Code-Assist request body.
///
/// Antigravity style adds the agent envelope fields; `safetySettings` is
/// removed wherever the merged extra body may have introduced it.
#[allow(clippy::too_many_arguments)]
pub fn build_request_body(
    style: CodeAssistStyle,
    project_id: &str,
    model: &str,
    tiered: &TieredModel,
    converted: &ConvertedMessages,
    tools: &[ToolDeclaration],
    tool_choice: ToolChoiceMode,
    options: &GenerationOptions,
    session_id: &str,
    extra_body: Option<&Map<String, Value>>,
) -> Result<Value, AdapterError> {
    let mut request = Map::new();
    request.insert(
        "contents".to_string(),
        Value::Array(converted.contents.clone()),
    );
    request.insert(
        "systemInstruction".to_string(),
        converted.system_instruction.clone(),
    );
    request.insert("sessionId".to_string(), json!(session_id));

    if let Some(generation_config) = generation_config(model, tiered, options)? {
        request.insert("generationConfig".to_string(), generation_config);
    }

    // Zero tools means neither `tools` nor `toolConfig` appears
    if !tools.is_empty() {
        let declarations: Vec<Value> = tools
            .iter()
            .map(|tool| {
                let mut declaration = Map::new();
                declaration.insert("name".to_string(), json!(sanitize_tool_name(&tool.name)));
                if let Some(description) = &tool.description {
                    declaration.insert("description".to_string(), json!(description));
                }
                declaration.insert("parameters".to_string(), clean_schema(&tool.parameters));
                Value::Object(declaration)
            })
            .collect();
        request.insert(
            "tools".to_string(),
            json!([{ "functionDeclarations": declarations }]),
        );
        let mode = match tool_choice {
            ToolChoiceMode::Auto => "AUTO",
            ToolChoiceMode::Required => "ANY",
            ToolChoiceMode::None => "NONE",
        };
        request.insert(
            "toolConfig".to_string(),
            json!({ "functionCallingConfig": { "mode": mode } }),
        );
    }

    let mut body = Map::new();
    if let Some(extra) = extra_body {
        for (key, value) in extra {
            body.insert(key.clone(), value.clone());
        }
    }
    body.insert("project".to_string(), json!(project_id));
    body.insert("model".to_string(), json!(tiered.request_model_id));

    if style == CodeAssistStyle::Antigravity {
        body.insert("requestType".to_string(), json!("agent"));
        body.insert("userAgent".to_string(), json!("antigravity"));
        body.insert(
            "requestId".to_string(),
            json!(format!("agent-{}", uuid::Uuid::new_v4())),
        );
    }

    // The server rejects safety settings on this surface
    body.remove("safetySettings");
    request.remove("safetySettings");

    body.insert("request".to_string(), Value::Object(request));
    Ok(Value::Object(body))
}

/// Generation config with per-family output caps and thinking config.
///
/// # Errors
///
/// Rejects a `max_output_tokens` at or below the thinking budget before
/// any I/O happens.
fn generation_config(
    model: &str,
    tiered: &TieredModel,
    options: &GenerationOptions,
) -> Result<Option<Value>, AdapterError> {
    let mut config = Map::new();

    if let Some(temperature) = options.temperature {
        config.insert("temperature".to_string(), json!(temperature));
    }
    if let Some(top_p) = options.top_p {
        config.insert("topP".to_string(), json!(top_p));
    }
    if let Some(top_k) = options.top_k {
        config.insert("topK".to_string(), json!(top_k));
    }
    if let Some(presence_penalty) = options.presence_penalty {
        config.insert("presencePenalty".to_string(), json!(presence_penalty));
    }
    if let Some(frequency_penalty) = options.frequency_penalty {
        config.insert("frequencyPenalty".to_string(), json!(frequency_penalty));
    }

    let cap = if is_gemini_3_pro(model) && !is_image_model(model) {
        Some(GEMINI_3_PRO_MAX_OUTPUT)
    } else if is_claude_opus(model) {
        Some(CLAUDE_OPUS_MAX_OUTPUT)
    } else {
        None
    };
    let max_output_tokens = match (options.max_output_tokens, cap) {
        (Some(requested), Some(cap)) => Some(requested.min(cap)),
        (Some(requested), None) => Some(requested),
        (None, _) => None,
    };
    if let Some(max_output_tokens) = max_output_tokens {
        config.insert("maxOutputTokens".to_string(), json!(max_output_tokens));
    }

    let thinking_model = tiered.request_model_id.ends_with("-thinking");
    if is_gemini_3(model) {
        if let Some(level) = tiered.level {
            config.insert(
                "thinkingConfig".to_string(),
                json!({ "includeThoughts": true, "thinkingLevel": level.as_str().to_uppercase() }),
            );
        }
    } else if thinking_model {
        let budget = if is_claude_opus(model) {
            opus_thinking_budget(options.reasoning_effort)
        } else {
            None
        };
        if let (Some(budget), Some(max_output_tokens)) = (budget, max_output_tokens)
            && max_output_tokens <= budget
        {
            return Err(AdapterError::SchemaRejection(format!(
                "maxOutputTokens ({max_output_tokens}) must exceed the thinking budget ({budget})"
            )));
        }
        let mut thinking = Map::new();
        thinking.insert("includeThoughts".to_string(), json!(true));
        if let Some(budget) = budget {
            thinking.insert("thinkingBudget".to_string(), json!(budget));
        }
        config.insert("thinkingConfig".to_string(), Value::Object(thinking));
    }

    Ok((!config.is_empty()).then_some(Value::Object(config)))
}
