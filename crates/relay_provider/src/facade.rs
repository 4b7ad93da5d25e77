use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use relay_domain::{AuthConfig, ChatRequest, NetworkOptions, ResponsePart};
use relay_services::methods::vendors::antigravity::DEFAULT_PROJECT_ID;
use relay_services::{AuthManager, ConfigStore};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::code_assist::{ChatContext, CodeAssistAdapter, CodeAssistStyle, encode_marker};
use crate::AdapterError;

/// Streams of response parts handed back to the host
pub type ResponseStream = BoxStream<'static, Result<ResponsePart, AdapterError>>;

/// The chat service facade.
///
/// For each incoming request: resolve the provider's credential through
/// the auth manager, pick the adapter registered for the provider's
/// method, stream the adapter's parts back, and propagate cancellation.
pub struct ChatService {
    manager: Arc<AuthManager>,
    config: Arc<ConfigStore>,
    antigravity: Arc<CodeAssistAdapter>,
    gemini_cli: Arc<CodeAssistAdapter>,
}

impl ChatService {
    pub fn new(
        manager: Arc<AuthManager>,
        config: Arc<ConfigStore>,
        antigravity: Arc<CodeAssistAdapter>,
        gemini_cli: Arc<CodeAssistAdapter>,
    ) -> Self {
        Self { manager, config, antigravity, gemini_cli }
    }

    /// Streams one chat request against a named provider.
    pub async fn stream_chat(
        &self,
        provider_name: &str,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ResponseStream, AdapterError> {
        let provider = self
            .config
            .find(provider_name)
            .ok_or_else(|| AdapterError::MissingCredential(provider_name.to_string()))?;

        let (adapter, project_id) = self.route(&provider.auth)?;

        let credential = self
            .manager
            .get_credential(provider_name)
            .await
            .ok_or_else(|| AdapterError::MissingCredential(provider_name.to_string()))?;

        let ctx = ChatContext {
            request,
            credential,
            project_id,
            user_base_url: Some(provider.base_url.clone()).filter(|url| !url.is_empty()),
            network: provider.network.clone(),
            cancel,
        };

        let inner = adapter.stream_chat(&ctx).await?;
        Ok(into_parts_stream(inner))
    }

    /// Picks the adapter for a provider's auth method plus the project id
    /// its requests should carry.
    fn route(&self, auth: &AuthConfig) -> Result<(Arc<CodeAssistAdapter>, String), AdapterError> {
        match auth {
            AuthConfig::AntigravityOauth(antigravity) => Ok((
                self.antigravity.clone(),
                antigravity
                    .project_id
                    .clone()
                    .unwrap_or_else(|| DEFAULT_PROJECT_ID.to_string()),
            )),
            AuthConfig::GoogleGeminiOauth(gemini) => Ok((
                self.gemini_cli.clone(),
                gemini
                    .project_id
                    .clone()
                    .or_else(|| gemini.managed_project_id.clone())
                    .unwrap_or_else(|| DEFAULT_PROJECT_ID.to_string()),
            )),
            other => Err(AdapterError::UnsupportedMethod(other.method().to_string())),
        }
    }
}

/// Lifts a stream of normalized `GenerateContentResponse` values into
/// host-facing response parts. Raw model contents accumulate into one
/// stateful marker emitted at the end of the turn, so the next request
/// can replay them with thought signatures and tool-use ids intact.
fn into_parts_stream(
    mut inner: BoxStream<'static, Result<Value, AdapterError>>,
) -> ResponseStream {
    let stream = async_stream::stream! {
        let mut raw_contents: Vec<Value> = Vec::new();
        let mut finish_reason: Option<String> = None;

        while let Some(item) = inner.next().await {
            match item {
                Err(error) => {
                    yield Err(error);
                    return;
                }
                Ok(response) => {
                    let Some(candidate) = response
                        .get("candidates")
                        .and_then(Value::as_array)
                        .and_then(|candidates| candidates.first())
                    else {
                        debug!("response event without candidates; skipping");
                        continue;
                    };

                    if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
                        finish_reason = Some(reason.to_string());
                    }
                    if let Some(content) = candidate.get("content") {
                        raw_contents.push(content.clone());
                        for part in extract_parts(content) {
                            yield Ok(part);
                        }
                    }
                }
            }
        }

        if !raw_contents.is_empty() {
            yield Ok(ResponsePart::StatefulMarker { data: encode_marker(&raw_contents) });
        }
        yield Ok(ResponsePart::Finish { reason: finish_reason });
    };
    stream.boxed()
}

/// Maps one `content` block onto response parts
fn extract_parts(content: &Value) -> Vec<ResponsePart> {
    let Some(parts) = content.get("parts").and_then(Value::as_array) else {
        return Vec::new();
    };

    parts
        .iter()
        .filter_map(|part| {
            if let Some(call) = part.get("functionCall") {
                return Some(ResponsePart::ToolCall {
                    id: call
                        .get("id")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("call-{}", uuid::Uuid::new_v4())),
                    name: call
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    arguments: call.get("args").cloned().unwrap_or(Value::Null),
                });
            }
            let text = part.get("text").and_then(Value::as_str)?;
            if text.is_empty() {
                return None;
            }
            if part.get("thought").and_then(Value::as_bool) == Some(true) {
                Some(ResponsePart::Thought {
                    text: text.to_string(),
                    signature: part
                        .get("thoughtSignature")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                })
            } else {
                Some(ResponsePart::Text { text: text.to_string() })
            }
        })
        .collect()
}
