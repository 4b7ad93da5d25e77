//! Domain types for the unified chat gateway core.
//!
//! Everything here is pure data: provider configuration, the auth-config
//! taxonomy, token records, secret references, status events and the chat
//! request/response shapes consumed by request adapters. No I/O.

mod auth_config;
mod chat;
mod error;
mod oauth2_config;
mod observer;
mod provider_config;
mod retry;
mod secret_ref;
mod signature;
mod status;
mod token;

pub use auth_config::*;
pub use chat::*;
pub use error::*;
pub use oauth2_config::*;
pub use observer::*;
pub use provider_config::*;
pub use retry::*;
pub use secret_ref::*;
pub use signature::*;
pub use status::*;
pub use token::*;
