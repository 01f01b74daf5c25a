//! Session and auth-change event types.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Leeway subtracted from the expiry timestamp so a token is refreshed
/// slightly before the server would reject it.
const EXPIRY_MARGIN_SECS: i64 = 30;

/// Backend-issued credential bundle representing an authenticated identity.
///
/// Held by the gateway for the process lifetime only; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Returns true if the access token is expired (or about to expire).
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at - Duration::seconds(EXPIRY_MARGIN_SECS)
    }
}

/// What kind of auth-state change an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthChange {
    /// A session was established.
    SignedIn,
    /// The session was cleared.
    SignedOut,
    /// The access token was refreshed.
    TokenRefreshed,
    /// A recovery-link exchange completed; the user must set a new password.
    RecoveryRequested,
    /// The user record changed (e.g. password updated).
    UserUpdated,
}

/// A tagged auth-change event.
///
/// Session-bearing changes carry the session payload; the recovery marker
/// carries none, so consumers can match exhaustively on the combination.
#[derive(Debug, Clone)]
pub struct AuthEvent {
    pub change: AuthChange,
    pub session: Option<Session>,
}

impl AuthEvent {
    pub fn signed_in(session: Session) -> Self {
        Self {
            change: AuthChange::SignedIn,
            session: Some(session),
        }
    }

    pub fn signed_out() -> Self {
        Self {
            change: AuthChange::SignedOut,
            session: None,
        }
    }

    pub fn token_refreshed(session: Session) -> Self {
        Self {
            change: AuthChange::TokenRefreshed,
            session: Some(session),
        }
    }

    pub fn recovery_requested() -> Self {
        Self {
            change: AuthChange::RecoveryRequested,
            session: None,
        }
    }

    pub fn user_updated(session: Session) -> Self {
        Self {
            change: AuthChange::UserUpdated,
            session: Some(session),
        }
    }
}

/// Which kind of fragment-token exchange a `set_session` call performs.
///
/// A `Recovery` grant installs the session but announces it with the
/// recovery marker, mirroring how the backing service discriminates
/// `type=recovery` callbacks from plain sign-in callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenGrant {
    /// Generic OAuth/email confirmation callback.
    Callback,
    /// Password-recovery callback.
    Recovery,
}
