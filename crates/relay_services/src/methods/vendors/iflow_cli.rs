//! iFlow CLI sign-in.
//!
//! iFlow access tokens live for days; refresh a full day ahead so a laptop
//! that sleeps over a weekend still wakes up with a valid session.

use relay_domain::AuthMethodKind;

use super::super::vendor::{VendorDescriptor, VendorFlow};

pub static DESCRIPTOR: VendorDescriptor = VendorDescriptor {
    kind: AuthMethodKind::IflowCli,
    label: "iFlow CLI",
    description: "Sign in with the iFlow account used by the iFlow CLI",
    client_id: "10009311001",
    client_secret: Some("4Z3YjXycVsQvyGF6etEvNpFMQWJdpqPMzt9XQHgvrfcNgCTHE2at6T3JEYlPasHf"),
    authorization_url: "https://iflow.cn/oauth",
    token_url: "https://iflow.cn/oauth/token",
    scopes: &["openid", "profile", "api"],
    redirect_uri: None,
    flow: VendorFlow::AuthorizationCode,
    pkce: true,
    expiry_buffer_secs: 24 * 60 * 60,
    user_info_url: Some("https://iflow.cn/oauth/userinfo"),
    headers: &[],
};
