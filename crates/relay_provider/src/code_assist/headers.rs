use std::collections::HashMap;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::json;

use super::CodeAssistStyle;
use crate::ProcessSession;

/// Headers the host may have configured that must never reach Code-Assist
const STRIPPED_HEADERS: &[&str] = &["x-api-key", "x-goog-api-key", "x-goog-user-project"];

const API_CLIENT: &str = "google-api-nodejs-client/9.15.1";
const GEMINI_CLI_USER_AGENT: &str = "GeminiCLI/0.9.0 (linux; x64)";

/// Builds the header set for one Code-Assist request.
///
/// Antigravity style sends the per-process synthetic fingerprint as the
/// User-Agent; Gemini-CLI style sends a JSON `Client-Metadata` with IDE
/// and platform fields. Configured extra headers are merged first so the
/// mandatory set always wins, and the strip list is applied last.
pub fn build_headers(
    style: CodeAssistStyle,
    session: &ProcessSession,
    access_token: &str,
    streaming: bool,
    thinking_claude: bool,
    extra_headers: Option<&HashMap<String, String>>,
) -> HeaderMap {
    let mut headers = HeaderMap::new();

    if let Some(extra) = extra_headers {
        for (name, value) in extra {
            if let (Ok(name), Ok(value)) =
                (HeaderName::try_from(name.as_str()), HeaderValue::from_str(value))
            {
                headers.insert(name, value);
            }
        }
    }

    headers.insert(
        reqwest::header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {access_token}"))
            .unwrap_or(HeaderValue::from_static("Bearer invalid")),
    );
    headers.insert(
        reqwest::header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers.insert(
        HeaderName::from_static("x-goog-api-client"),
        HeaderValue::from_static(API_CLIENT),
    );

    match style {
        CodeAssistStyle::Antigravity => {
            headers.insert(
                reqwest::header::USER_AGENT,
                HeaderValue::from_str(&session.device_fingerprint)
                    .unwrap_or(HeaderValue::from_static("antigravity")),
            );
            headers.insert(
                HeaderName::from_static("client-metadata"),
                HeaderValue::from_static("ideType=IDE_UNSPECIFIED,platform=PLATFORM_UNSPECIFIED,pluginType=ANTIGRAVITY"),
            );
        }
        CodeAssistStyle::GeminiCli => {
            headers.insert(
                reqwest::header::USER_AGENT,
                HeaderValue::from_static(GEMINI_CLI_USER_AGENT),
            );
            let metadata = json!({
                "ideType": "IDE_UNSPECIFIED",
                "platform": "PLATFORM_UNSPECIFIED",
                "pluginType": "GEMINI",
                "duetProject": serde_json::Value::Null,
            });
            if let Ok(value) = HeaderValue::from_str(&metadata.to_string()) {
                headers.insert(HeaderName::from_static("client-metadata"), value);
            }
        }
    }

    if streaming {
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("text/event-stream"),
        );
    }
    if thinking_claude {
        headers.insert(
            HeaderName::from_static("anthropic-beta"),
            HeaderValue::from_static("interleaved-thinking-2025-05-14"),
        );
    }

    for name in STRIPPED_HEADERS {
        headers.remove(*name);
    }
    headers
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn session() -> ProcessSession {
        ProcessSession::generate()
    }

    #[test]
    fn test_mandatory_headers_present() {
        let headers = build_headers(
            CodeAssistStyle::Antigravity,
            &session(),
            "tok",
            true,
            false,
            None,
        );

        assert_eq!(headers["authorization"], "Bearer tok");
        assert_eq!(headers["content-type"], "application/json");
        assert_eq!(headers["accept"], "text/event-stream");
        assert!(headers.contains_key("x-goog-api-client"));
        assert!(headers.contains_key("client-metadata"));
        assert!(headers.contains_key("user-agent"));
    }

    #[test]
    fn test_forbidden_headers_are_stripped() {
        let extra = HashMap::from([
            ("x-api-key".to_string(), "leak".to_string()),
            ("x-goog-user-project".to_string(), "leak".to_string()),
            ("x-custom".to_string(), "kept".to_string()),
        ]);
        let headers = build_headers(
            CodeAssistStyle::Antigravity,
            &session(),
            "tok",
            false,
            false,
            Some(&extra),
        );

        assert!(!headers.contains_key("x-api-key"));
        assert!(!headers.contains_key("x-goog-user-project"));
        assert_eq!(headers["x-custom"], "kept");
    }

    #[test]
    fn test_extra_headers_cannot_override_authorization() {
        let extra = HashMap::from([("authorization".to_string(), "Bearer forged".to_string())]);
        let headers = build_headers(
            CodeAssistStyle::Antigravity,
            &session(),
            "tok",
            false,
            false,
            Some(&extra),
        );

        assert_eq!(headers["authorization"], "Bearer tok");
    }

    #[test]
    fn test_gemini_cli_metadata_is_json() {
        let headers = build_headers(
            CodeAssistStyle::GeminiCli,
            &session(),
            "tok",
            false,
            false,
            None,
        );

        let metadata = headers["client-metadata"].to_str().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(metadata).unwrap();
        assert_eq!(parsed["pluginType"], "GEMINI");
    }

    #[test]
    fn test_thinking_claude_beta_header() {
        let headers = build_headers(
            CodeAssistStyle::Antigravity,
            &session(),
            "tok",
            true,
            true,
            None,
        );
        assert_eq!(headers["anthropic-beta"], "interleaved-thinking-2025-05-14");

        let without = build_headers(
            CodeAssistStyle::Antigravity,
            &session(),
            "tok",
            true,
            false,
            None,
        );
        assert!(!without.contains_key("anthropic-beta"));
    }
}
