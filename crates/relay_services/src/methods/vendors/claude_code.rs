//! Claude Code sign-in: Anthropic's published OAuth client for the CLI.

use relay_domain::AuthMethodKind;

use super::super::vendor::{VendorDescriptor, VendorFlow};

pub static DESCRIPTOR: VendorDescriptor = VendorDescriptor {
    kind: AuthMethodKind::ClaudeCode,
    label: "Claude Code",
    description: "Sign in with the Anthropic account used by Claude Code",
    client_id: "9d1c250a-e61b-44d9-88ed-5944d1962f5e",
    client_secret: None,
    authorization_url: "https://claude.ai/oauth/authorize",
    token_url: "https://console.anthropic.com/v1/oauth/token",
    scopes: &["org:create_api_key", "user:profile", "user:inference"],
    // Documented callback page; the code is relayed back through the host
    redirect_uri: Some("https://console.anthropic.com/oauth/code/callback"),
    flow: VendorFlow::AuthorizationCode,
    pkce: true,
    // Anthropic sessions are long; refresh four hours ahead of expiry
    expiry_buffer_secs: 4 * 60 * 60,
    user_info_url: None,
    headers: &[("anthropic-beta", "oauth-2025-04-20")],
};
