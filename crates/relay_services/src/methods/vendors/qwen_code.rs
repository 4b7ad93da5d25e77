//! Qwen Code sign-in: RFC 8628 device flow against chat.qwen.ai.
//!
//! The token grant carries a `resource_url` extra naming the API host the
//! account should talk to; the provider writes it back into the config.

use relay_domain::AuthMethodKind;

use super::super::vendor::{VendorDescriptor, VendorFlow};

pub static DESCRIPTOR: VendorDescriptor = VendorDescriptor {
    kind: AuthMethodKind::QwenCode,
    label: "Qwen Code",
    description: "Sign in with the Qwen account used by Qwen Code",
    client_id: "f0304373b74a44d2b584a3fb70ca9e56",
    client_secret: None,
    authorization_url: "https://chat.qwen.ai/api/v1/oauth2/device/code",
    token_url: "https://chat.qwen.ai/api/v1/oauth2/token",
    scopes: &["openid", "profile", "email", "model.completion"],
    redirect_uri: None,
    flow: VendorFlow::DeviceCode,
    pkce: false,
    expiry_buffer_secs: 5 * 60,
    user_info_url: None,
    headers: &[],
};
