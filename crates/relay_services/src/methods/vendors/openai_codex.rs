//! OpenAI Codex sign-in: the OAuth client shipped with the Codex CLI.

use relay_domain::AuthMethodKind;

use super::super::vendor::{VendorDescriptor, VendorFlow};

pub static DESCRIPTOR: VendorDescriptor = VendorDescriptor {
    kind: AuthMethodKind::OpenaiCodex,
    label: "OpenAI Codex",
    description: "Sign in with the OpenAI account used by Codex",
    client_id: "app_EMoamEEZ73f0CkXaXp7hrann",
    client_secret: None,
    authorization_url: "https://auth.openai.com/oauth/authorize",
    token_url: "https://auth.openai.com/oauth/token",
    scopes: &["openid", "profile", "email", "offline_access"],
    // Codex runs a loopback listener on a fixed port
    redirect_uri: Some("http://localhost:1455/auth/callback"),
    flow: VendorFlow::AuthorizationCode,
    pkce: true,
    expiry_buffer_secs: 5 * 60,
    user_info_url: None,
    headers: &[],
};
