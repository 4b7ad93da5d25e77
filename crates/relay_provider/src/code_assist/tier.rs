use relay_domain::{GenerationOptions, ReasoningEffort};

use super::CodeAssistStyle;

/// Thinking level recorded for the request body and, for Gemini-3-Pro,
/// appended to the model id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkingLevel {
    Minimal,
    Low,
    Medium,
    High,
}

impl ThinkingLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Model id after vendor tiering plus the recorded thinking level
#[derive(Debug, Clone, PartialEq)]
pub struct TieredModel {
    pub request_model_id: String,
    pub level: Option<ThinkingLevel>,
}

/// Reasoning-effort field mapped onto a thinking level. `high` is the
/// default when nothing was requested; `none` suppresses the level.
fn level_from_effort(effort: Option<ReasoningEffort>) -> Option<ThinkingLevel> {
    match effort {
        Some(ReasoningEffort::Minimal) => Some(ThinkingLevel::Minimal),
        Some(ReasoningEffort::Low) => Some(ThinkingLevel::Low),
        Some(ReasoningEffort::Medium) => Some(ThinkingLevel::Medium),
        Some(ReasoningEffort::High) | Some(ReasoningEffort::XHigh) | None => {
            Some(ThinkingLevel::High)
        }
        Some(ReasoningEffort::None) => None,
    }
}

pub fn is_claude_model(model: &str) -> bool {
    model.contains("claude")
}

pub fn is_claude_opus(model: &str) -> bool {
    is_claude_model(model) && model.contains("opus")
}

pub fn is_gemini_3(model: &str) -> bool {
    model.starts_with("gemini-3")
}

pub fn is_gemini_3_pro(model: &str) -> bool {
    is_gemini_3(model) && model.contains("pro")
}

pub fn is_image_model(model: &str) -> bool {
    model.contains("image")
}

/// Applies vendor model-id tiering.
///
/// Claude gets `-thinking` for Opus or when thinking is on; Gemini-3-Pro
/// gets a tier suffix (default `high`) unless it is an image variant;
/// Gemini-3 non-Pro keeps its id but records the level for the request
/// body. Gemini-CLI style additionally requires a `-preview` suffix.
pub fn tier_model(model: &str, options: &GenerationOptions, style: CodeAssistStyle) -> TieredModel {
    let level = level_from_effort(options.reasoning_effort);

    let mut request_model_id = if is_claude_model(model) {
        let thinking = is_claude_opus(model) || options.thinking;
        if thinking && !model.ends_with("-thinking") {
            format!("{model}-thinking")
        } else {
            model.to_string()
        }
    } else if is_gemini_3_pro(model) && !is_image_model(model) {
        match level {
            Some(level) => format!("{model}-{}", level.as_str()),
            None => model.to_string(),
        }
    } else {
        model.to_string()
    };

    if style == CodeAssistStyle::GeminiCli && !request_model_id.ends_with("-preview") {
        request_model_id.push_str("-preview");
    }

    let level = if is_gemini_3(model) || is_claude_model(model) { level } else { None };
    TieredModel { request_model_id, level }
}
