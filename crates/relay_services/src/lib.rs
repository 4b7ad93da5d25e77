//! Credential lifecycle services: secret storage, provider configuration,
//! the auth-config taxonomy, auth-method providers and the auth manager
//! that ties them together.

mod callback;
mod config_store;
mod infra;
mod manager;
pub mod methods;
mod oauth_http;
mod pkce;
mod secrets;
pub mod taxonomy;

pub use callback::*;
pub use config_store::*;
pub use infra::*;
pub use manager::*;
pub use oauth_http::*;
pub use pkce::*;
pub use secrets::*;
