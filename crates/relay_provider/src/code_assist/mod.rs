//! The Code-Assist request adapter: Antigravity and Gemini-CLI chat over
//! Google's internal API surface.

use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;
use relay_domain::{AuthCredential, ChatRequest, NetworkOptions, RetryConfig};
use reqwest::header::HeaderMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub mod endpoint;
pub mod headers;
pub mod message;
pub mod request;
pub mod schema;
pub mod sse;
pub mod tier;

pub use endpoint::{CODE_ASSIST_ENDPOINTS, EndpointRotation};
pub use message::{ConvertedMessages, convert_messages, encode_marker};
pub use schema::{clean_schema, sanitize_tool_name};
pub use sse::{SseEvent, SseParser, normalize_response};
pub use tier::{ThinkingLevel, TieredModel, tier_model};

use crate::retry::{effective_delay, server_suggested_delay};
use crate::{AdapterError, ProcessSession, session_id};

/// Which vendor shape this adapter speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeAssistStyle {
    Antigravity,
    GeminiCli,
}

/// Everything one chat request needs, resolved by the facade
#[derive(Clone)]
pub struct ChatContext {
    pub request: ChatRequest,
    pub credential: AuthCredential,
    pub project_id: String,
    pub user_base_url: Option<String>,
    pub network: NetworkOptions,
    pub cancel: CancellationToken,
}

/// Ceiling on the exponential backoff between 429 retries on one endpoint
const RATE_LIMIT_BACKOFF_CAP: Duration = Duration::from_secs(60);

pub struct CodeAssistAdapter {
    client: reqwest::Client,
    style: CodeAssistStyle,
    session: ProcessSession,
    endpoints: EndpointRotation,
    retry: RetryConfig,
    /// Abort streaming when no bytes arrive for this long
    response_timeout: Duration,
}

struct PreparedRequest {
    body: Value,
    headers: HeaderMap,
}

impl CodeAssistAdapter {
    pub fn new(client: reqwest::Client, style: CodeAssistStyle, session: ProcessSession) -> Self {
        Self {
            client,
            style,
            session,
            endpoints: EndpointRotation::new(),
            retry: RetryConfig::chat(),
            response_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Replaces the endpoint rotation; tests point it at local servers
    pub fn with_endpoints(mut self, endpoints: EndpointRotation) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Synchronous request preparation; schema rejections surface here
    /// before any I/O.
    fn prepare(&self, ctx: &ChatContext, streaming: bool) -> Result<PreparedRequest, AdapterError> {
        let model = &ctx.request.model;
        let tiered = tier_model(model, &ctx.request.options, self.style);

        let converted = convert_messages(
            &ctx.request.messages,
            model,
            tiered.level,
            !ctx.request.tools.is_empty(),
            self.style,
        );

        let session_id = session_id(
            &self.session,
            &tiered.request_model_id,
            Some(&ctx.project_id),
            &converted.system_text,
            converted.first_user_text.as_deref(),
        );

        let body = request::build_request_body(
            self.style,
            &ctx.project_id,
            model,
            &tiered,
            &converted,
            &ctx.request.tools,
            ctx.request.tool_choice,
            &ctx.request.options,
            &session_id,
            ctx.network.extra_body.as_ref(),
        )?;

        let thinking_claude =
            tier::is_claude_model(model) && tiered.request_model_id.ends_with("-thinking");
        let headers = headers::build_headers(
            self.style,
            &self.session,
            &ctx.credential.value,
            streaming,
            thinking_claude,
            ctx.network.extra_headers.as_ref(),
        );

        Ok(PreparedRequest { body, headers })
    }

    /// Posts to the method across the endpoint fallback list with bounded
    /// retry. 403/404/5xx fall through to the next candidate; the first
    /// 429 falls through too, later ones back off (server hint honored,
    /// capped). Other non-success statuses fail immediately.
    async fn send(
        &self,
        method: &str,
        streaming: bool,
        prepared: &PreparedRequest,
        ctx: &ChatContext,
    ) -> Result<reqwest::Response, AdapterError> {
        let candidates = self.endpoints.candidates(ctx.user_base_url.as_deref());
        let mut last_error: Option<AdapterError> = None;
        let mut last_server_hint: Option<Duration> = None;
        let mut seen_rate_limit = false;
        let mut rate_limit_backoff = Duration::from_secs(1);

        for attempt in 0..=self.retry.max_retry_attempts {
            for base in &candidates {
                if ctx.cancel.is_cancelled() {
                    return Err(AdapterError::Cancelled);
                }

                let query = if streaming { "?alt=sse" } else { "" };
                let url = format!("{base}/v1internal:{method}{query}");
                let mut request = self
                    .client
                    .post(&url)
                    .headers(prepared.headers.clone())
                    .json(&prepared.body);
                if let Some(timeout_ms) = ctx.network.timeout_ms {
                    request = request.timeout(Duration::from_millis(timeout_ms));
                }

                let response = tokio::select! {
                    response = request.send() => response,
                    _ = ctx.cancel.cancelled() => return Err(AdapterError::Cancelled),
                };
                let response = match response {
                    Ok(response) => response,
                    Err(error) => {
                        debug!(url, %error, "request failed; trying next endpoint");
                        last_error = Some(error.into());
                        continue;
                    }
                };

                let status = response.status().as_u16();
                if response.status().is_success() {
                    self.endpoints.mark_success(base);
                    return Ok(response);
                }

                let body = response.text().await.unwrap_or_default();
                match status {
                    403 | 404 | 500..=599 => {
                        debug!(url, status, "endpoint rejected request; falling through");
                        last_error = Some(AdapterError::Http { status, body });
                    }
                    429 => {
                        let server_hint = server_suggested_delay(&body);
                        last_server_hint = server_hint;
                        last_error = Some(AdapterError::Http { status, body });
                        if !seen_rate_limit {
                            // First rate limit falls through to the next
                            // candidate without waiting
                            seen_rate_limit = true;
                            continue;
                        }
                        let delay = effective_delay(rate_limit_backoff, server_hint)
                            .min(RATE_LIMIT_BACKOFF_CAP.max(server_hint.unwrap_or(Duration::ZERO)));
                        rate_limit_backoff = (rate_limit_backoff * 2).min(RATE_LIMIT_BACKOFF_CAP);
                        warn!(url, ?delay, "rate limited; backing off");
                        if !sleep_cancellable(delay, &ctx.cancel).await {
                            return Err(AdapterError::Cancelled);
                        }
                    }
                    _ => return Err(AdapterError::Http { status, body }),
                }
            }

            if attempt == self.retry.max_retry_attempts {
                break;
            }
            let delay = effective_delay(self.retry.delay_for_attempt(attempt), last_server_hint);
            debug!(?delay, attempt, "endpoints exhausted; retrying");
            if !sleep_cancellable(delay, &ctx.cancel).await {
                return Err(AdapterError::Cancelled);
            }
        }

        Err(last_error.unwrap_or(AdapterError::Http { status: 0, body: "no endpoint reachable".to_string() }))
    }

    /// Streams one chat request as normalized `GenerateContentResponse`
    /// values. Cancellation before any bytes ends the stream without
    /// yielding.
    pub async fn stream_chat(
        &self,
        ctx: &ChatContext,
    ) -> Result<BoxStream<'static, Result<Value, AdapterError>>, AdapterError> {
        let prepared = self.prepare(ctx, true)?;
        let response = self.send("streamGenerateContent", true, &prepared, ctx).await?;

        let idle_timeout = self.response_timeout;
        let cancel = ctx.cancel.clone();
        let mut bytes = response.bytes_stream();

        let stream = async_stream::stream! {
            let mut parser = SseParser::new();
            let mut done = false;
            while !done {
                let next = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = tokio::time::timeout(idle_timeout, bytes.next()) => next,
                };
                let chunk = match next {
                    Err(_) => {
                        yield Err(AdapterError::IdleTimeout(idle_timeout));
                        break;
                    }
                    Ok(None) => break,
                    Ok(Some(Err(error))) => {
                        yield Err(error.into());
                        break;
                    }
                    Ok(Some(Ok(chunk))) => chunk,
                };

                for event in parser.push(&chunk) {
                    match event {
                        SseEvent::Done => {
                            done = true;
                            break;
                        }
                        SseEvent::Data(payload) => {
                            match serde_json::from_str::<Value>(&payload) {
                                Ok(value) => yield Ok(normalize_response(value)),
                                Err(error) => {
                                    yield Err(AdapterError::InvalidResponse(format!(
                                        "bad SSE payload: {error}"
                                    )));
                                    done = true;
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        };
        Ok(stream.boxed())
    }

    /// Non-streaming variant sharing the unwrap and normalization path
    pub async fn generate(&self, ctx: &ChatContext) -> Result<Value, AdapterError> {
        let prepared = self.prepare(ctx, false)?;
        let response = self.send("generateContent", false, &prepared, ctx).await?;
        let value: Value = response
            .json()
            .await
            .map_err(|error| AdapterError::InvalidResponse(error.to_string()))?;
        Ok(normalize_response(value))
    }

    pub fn style(&self) -> CodeAssistStyle {
        self.style
    }
}

/// Sleeps unless cancelled first; `false` means cancelled
async fn sleep_cancellable(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = cancel.cancelled() => false,
    }
}
