//! Request adaptation for vendor chat endpoints.
//!
//! The Code-Assist adapter translates the host's abstract chat request
//! into the Antigravity / Gemini-CLI wire format: endpoint fallback,
//! model-id tiering, tool-schema normalization, deterministic session ids,
//! retry with server-suggested delay, and SSE streaming. The chat facade
//! on top dispatches each request to the adapter registered for the
//! provider's method, passing the credential resolved by the auth manager.

pub mod code_assist;
mod error;
mod facade;
mod retry;
mod session;

pub use error::*;
pub use facade::*;
pub use retry::*;
pub use session::*;
