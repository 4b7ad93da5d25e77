//! Code-Assist adapter scenarios against mock endpoints: fallback order,
//! rate-limit backoff with server-suggested delay, SSE streaming, and the
//! chat facade end to end.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use mockito::Server;
use pretty_assertions::assert_eq;
use relay_domain::{
    AntigravityAuth, AuthConfig, AuthCredential, ChatMessage, ChatRequest, ChatRole,
    NetworkOptions, OAuth2TokenData, ProviderConfig, ResponsePart, RetryConfig, SecretNamespace,
    VendorAuthBase,
};
use relay_provider::code_assist::{
    ChatContext, CodeAssistAdapter, CodeAssistStyle, EndpointRotation,
};
use relay_provider::{AdapterError, ChatService, ProcessSession};
use relay_services::methods::MethodDeps;
use relay_services::{
    AuthManager, ConfigStore, InMemorySecretStorage, OAuthHttp, ScriptedHost, SecretStore,
    UriCallbackBridge,
};
use tokio_util::sync::CancellationToken;

const SSE_HELLO: &str = concat!(
    "data: {\"response\":{\"candidates\":[{\"content\":{\"role\":\"model\",",
    "\"parts\":[{\"text\":\"hello\"}]},\"finish_reason\":\"STOP\"}]}}\n\n",
    "data: [DONE]\n\n",
);

fn adapter_over(endpoints: Vec<String>) -> CodeAssistAdapter {
    CodeAssistAdapter::new(
        reqwest::Client::new(),
        CodeAssistStyle::Antigravity,
        ProcessSession::generate(),
    )
    .with_endpoints(EndpointRotation::with_canonical(endpoints))
    .with_retry(RetryConfig {
        min_delay_ms: 100,
        max_delay_ms: 1_000,
        backoff_factor: 2.0,
        max_retry_attempts: 2,
        attempt_timeout_ms: 5_000,
        jitter: false,
    })
}

fn context(cancel: CancellationToken) -> ChatContext {
    ChatContext {
        request: ChatRequest::new(
            "gemini-3-pro",
            vec![ChatMessage::text(ChatRole::User, "hi")],
        ),
        credential: AuthCredential::key("tok"),
        project_id: "proj-1".to_string(),
        user_base_url: None,
        network: NetworkOptions::default(),
        cancel,
    }
}

async fn collect_texts(adapter: &CodeAssistAdapter, ctx: &ChatContext) -> Vec<String> {
    let stream = adapter.stream_chat(ctx).await.unwrap();
    stream
        .map(|event| event.unwrap())
        .filter_map(|value| async move {
            value["candidates"][0]["content"]["parts"][0]["text"]
                .as_str()
                .map(str::to_string)
        })
        .collect()
        .await
}

/// Scenario 5: the first endpoint rate-limits with a structured retry
/// hint; the adapter falls through to the fallback endpoint, streams the
/// response, and pins that endpoint for the next request.
#[tokio::test]
async fn rate_limited_endpoint_falls_through_and_pins_fallback() {
    let mut limited = Server::new_async().await;
    let limited_mock = limited
        .mock("POST", "/v1internal:streamGenerateContent?alt=sse")
        .with_status(429)
        .with_body(
            r#"{"error":{"code":429,"details":[
                {"@type":"type.googleapis.com/google.rpc.RetryInfo","retryDelay":"45s"}
            ]}}"#,
        )
        .expect(1)
        .create_async()
        .await;

    let mut healthy = Server::new_async().await;
    let healthy_mock = healthy
        .mock("POST", "/v1internal:streamGenerateContent?alt=sse")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(SSE_HELLO)
        .expect(2)
        .create_async()
        .await;

    let adapter = adapter_over(vec![limited.url(), healthy.url()]);
    let ctx = context(CancellationToken::new());

    // First request: 429 falls through once, fallback streams
    let started = Instant::now();
    assert_eq!(collect_texts(&adapter, &ctx).await, vec!["hello".to_string()]);
    // The first 429 falls through without honoring the 45s hint
    assert!(started.elapsed() < Duration::from_secs(5));

    // Second request goes straight to the pinned endpoint
    assert_eq!(collect_texts(&adapter, &ctx).await, vec!["hello".to_string()]);

    limited_mock.assert_async().await;
    healthy_mock.assert_async().await;
}

/// When every endpoint is rate-limited, the retry delay honors the
/// server's hint over the smaller local backoff.
#[tokio::test]
async fn server_suggested_delay_dominates_backoff() {
    let mut server = Server::new_async().await;
    let healthy = server
        .mock("POST", "/v1internal:streamGenerateContent?alt=sse")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(SSE_HELLO)
        .create_async()
        .await;
    // Mocks match newest-first; the rate limit stops matching after one hit
    let limited = server
        .mock("POST", "/v1internal:streamGenerateContent?alt=sse")
        .with_status(429)
        .with_body(
            r#"{"error":{"details":[
                {"@type":"type.googleapis.com/google.rpc.RetryInfo","retryDelay":"1s"}
            ]}}"#,
        )
        .expect_at_most(1)
        .create_async()
        .await;

    let adapter = adapter_over(vec![server.url()]);
    let ctx = context(CancellationToken::new());

    let started = Instant::now();
    assert_eq!(collect_texts(&adapter, &ctx).await, vec!["hello".to_string()]);
    // Local backoff would be 100ms; the 1s server hint must win
    assert!(started.elapsed() >= Duration::from_secs(1));

    limited.assert_async().await;
    healthy.assert_async().await;
}

#[tokio::test]
async fn forbidden_endpoint_falls_through() {
    let mut broken = Server::new_async().await;
    broken
        .mock("POST", "/v1internal:streamGenerateContent?alt=sse")
        .with_status(403)
        .with_body("{}")
        .create_async()
        .await;

    let mut healthy = Server::new_async().await;
    healthy
        .mock("POST", "/v1internal:streamGenerateContent?alt=sse")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(SSE_HELLO)
        .create_async()
        .await;

    let adapter = adapter_over(vec![broken.url(), healthy.url()]);
    let ctx = context(CancellationToken::new());

    assert_eq!(collect_texts(&adapter, &ctx).await, vec!["hello".to_string()]);
}

#[tokio::test]
async fn bad_request_fails_without_fallback() {
    let mut server = Server::new_async().await;
    let rejected = server
        .mock("POST", "/v1internal:streamGenerateContent?alt=sse")
        .with_status(400)
        .with_body(r#"{"error":{"message":"bad request"}}"#)
        .expect(1)
        .create_async()
        .await;

    let adapter = adapter_over(vec![server.url()]);
    let ctx = context(CancellationToken::new());

    let error = adapter.stream_chat(&ctx).await.err().unwrap();
    assert!(matches!(error, AdapterError::Http { status: 400, .. }));
    rejected.assert_async().await;
}

#[tokio::test]
async fn cancellation_before_connect_yields_nothing() {
    let adapter = adapter_over(vec!["http://127.0.0.1:1".to_string()]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let error = adapter.stream_chat(&context(cancel)).await.err().unwrap();
    assert!(matches!(error, AdapterError::Cancelled));
}

#[tokio::test]
async fn non_streaming_path_normalizes_identically() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/v1internal:generateContent")
        .with_status(200)
        .with_body(
            r#"{"response":{"candidates":[{"content":{"role":"model",
                "parts":[{"text":"hi","thought_signature":"sig"}]}}]}}"#,
        )
        .create_async()
        .await;

    let adapter = adapter_over(vec![server.url()]);
    let value = adapter.generate(&context(CancellationToken::new())).await.unwrap();

    // Envelope unwrapped and keys camelized, same as the streaming path
    assert_eq!(value["candidates"][0]["content"]["parts"][0]["text"], "hi");
    assert_eq!(
        value["candidates"][0]["content"]["parts"][0]["thoughtSignature"],
        "sig"
    );
}

/// Facade end to end: provider config + stored vendor token + adapter.
#[tokio::test]
async fn chat_service_streams_response_parts() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/v1internal:streamGenerateContent?alt=sse")
        .match_header("authorization", "Bearer t-antigravity")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(SSE_HELLO)
        .create_async()
        .await;

    let secrets = SecretStore::new(InMemorySecretStorage::new());
    let config = Arc::new(ConfigStore::new(secrets.clone()));
    let deps = MethodDeps {
        secrets: secrets.clone(),
        config: config.clone(),
        host: ScriptedHost::new(),
        bridge: Arc::new(UriCallbackBridge::new("editor://relay.gateway/callback")),
        http: OAuthHttp::new(reqwest::Client::new()),
    };
    let manager = Arc::new(AuthManager::new(config.clone(), deps));

    // Signed-in Antigravity provider with a fresh stored token
    let reference = secrets.create_ref(SecretNamespace::OAuth2Token);
    secrets
        .set_oauth2_token(&reference, &OAuth2TokenData::bearer("t-antigravity".to_string(), Some(3600)))
        .await
        .unwrap();
    config
        .add(ProviderConfig::new(
            "Antigravity",
            "",
            AuthConfig::AntigravityOauth(AntigravityAuth {
                base: VendorAuthBase {
                    identity_id: None,
                    token: Some(reference.to_string()),
                    email: None,
                },
                project_id: Some("proj-1".to_string()),
                tier: None,
            }),
        ))
        .unwrap();

    let adapter = Arc::new(
        CodeAssistAdapter::new(
            reqwest::Client::new(),
            CodeAssistStyle::Antigravity,
            ProcessSession::generate(),
        )
        .with_endpoints(EndpointRotation::with_canonical(vec![server.url()])),
    );
    let gemini = Arc::new(CodeAssistAdapter::new(
        reqwest::Client::new(),
        CodeAssistStyle::GeminiCli,
        ProcessSession::generate(),
    ));
    let service = ChatService::new(manager, config, adapter, gemini);

    let parts: Vec<ResponsePart> = service
        .stream_chat(
            "Antigravity",
            ChatRequest::new("gemini-3-pro", vec![ChatMessage::text(ChatRole::User, "hi")]),
            CancellationToken::new(),
        )
        .await
        .unwrap()
        .map(|part| part.unwrap())
        .collect()
        .await;

    assert_eq!(parts[0], ResponsePart::Text { text: "hello".to_string() });
    assert!(matches!(parts[1], ResponsePart::StatefulMarker { .. }));
    assert_eq!(
        parts.last().unwrap(),
        &ResponsePart::Finish { reason: Some("STOP".to_string()) }
    );
}
