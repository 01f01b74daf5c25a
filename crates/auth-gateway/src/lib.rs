//! Authentication gateway for the Expressions client shell.
//!
//! This crate provides:
//! - The `AuthBackend` capability trait consumed by the routing shell
//! - Tagged auth-change events with explicit subscription handles
//! - `SupabaseAuth`, a GoTrue REST client with token refresh and backoff

mod client;
mod error;
mod events;
mod session;
mod traits;

pub use client::{RefreshConfig, SupabaseAuth};
pub use error::{AuthError, AuthResult};
pub use events::{AuthEventRegistry, AuthSubscription};
pub use session::{AuthChange, AuthEvent, Session, TokenGrant};
pub use traits::AuthBackend;
