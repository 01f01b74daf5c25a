//! Supabase GoTrue REST client.
//!
//! Holds the process-lifetime session in memory, performs the token
//! endpoints' round-trips, and announces every change through the event
//! registry. Nothing here is persisted; a new process starts signed out.

use crate::events::{AuthEventRegistry, AuthSubscription};
use crate::session::{AuthEvent, Session, TokenGrant};
use crate::traits::AuthBackend;
use crate::{AuthError, AuthResult};
use chrono::{Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Validity window assumed for fragment tokens, which carry no expiry.
const FRAGMENT_TOKEN_TTL_SECS: i64 = 3600;

/// Configuration for retry behavior during token refresh.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Initial delay between retries in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 5000,
        }
    }
}

impl RefreshConfig {
    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let delay_ms = self.initial_delay_ms.saturating_mul(2u64.pow(attempt));
        let capped_ms = delay_ms.min(self.max_delay_ms);
        std::time::Duration::from_millis(capped_ms)
    }
}

/// Token refresh request.
#[derive(Debug, Serialize)]
struct RefreshRequest {
    refresh_token: String,
}

/// Token endpoint response (password grant and refresh grant).
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    user: TokenUser,
}

#[derive(Debug, Deserialize)]
struct TokenUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

/// User verification response.
#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

/// GoTrue REST client for the Expressions backend.
pub struct SupabaseAuth {
    supabase_url: String,
    publishable_key: String,
    http_client: Client,
    /// Current session, if any. Process-lifetime only.
    session: Mutex<Option<Session>>,
    events: AuthEventRegistry,
    refresh_config: RefreshConfig,
}

impl SupabaseAuth {
    /// Create a new client.
    pub fn new(supabase_url: &str, publishable_key: &str) -> Self {
        Self::with_refresh_config(supabase_url, publishable_key, RefreshConfig::default())
    }

    /// Create a new client with custom refresh configuration.
    pub fn with_refresh_config(
        supabase_url: &str,
        publishable_key: &str,
        refresh_config: RefreshConfig,
    ) -> Self {
        Self {
            supabase_url: supabase_url.trim_end_matches('/').to_string(),
            publishable_key: publishable_key.to_string(),
            http_client: Client::new(),
            session: Mutex::new(None),
            events: AuthEventRegistry::new(),
            refresh_config,
        }
    }

    fn install_session(&self, session: Session) {
        *self.session.lock().unwrap() = Some(session);
    }

    fn clear_session(&self) {
        *self.session.lock().unwrap() = None;
    }

    fn session_snapshot(&self) -> Option<Session> {
        self.session.lock().unwrap().clone()
    }

    fn session_from_token_response(&self, data: TokenResponse) -> Session {
        Session {
            access_token: data.access_token,
            refresh_token: data.refresh_token,
            user_id: data.user.id,
            email: data.user.email,
            expires_at: Utc::now() + Duration::seconds(data.expires_in),
        }
    }

    /// Sign in with email and password.
    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<Session> {
        let login_url = format!("{}/auth/v1/token?grant_type=password", self.supabase_url);

        debug!(url = %login_url, email = %email, "Attempting email/password sign-in");

        let response = self
            .http_client
            .post(&login_url)
            .header("apikey", &self.publishable_key)
            .header("Content-Type", "application/json")
            .json(&serde_json::json!({
                "email": email,
                "password": password,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Sign-in failed");
            return Err(AuthError::InvalidCredentials(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        let data: TokenResponse = response.json().await?;
        let session = self.session_from_token_response(data);
        self.install_session(session.clone());
        self.events.emit(AuthEvent::signed_in(session.clone()));

        info!(user_id = %session.user_id, "Sign-in successful");
        Ok(session)
    }

    /// Register a new account.
    ///
    /// Returns the established session, or `None` when the project requires
    /// email confirmation first (the user signs in after confirming).
    pub async fn sign_up(&self, email: &str, password: &str) -> AuthResult<Option<Session>> {
        let signup_url = format!("{}/auth/v1/signup", self.supabase_url);

        debug!(url = %signup_url, email = %email, "Attempting sign-up");

        let response = self
            .http_client
            .post(&signup_url)
            .header("apikey", &self.publishable_key)
            .header("Content-Type", "application/json")
            .json(&serde_json::json!({
                "email": email,
                "password": password,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Sign-up failed");
            return Err(AuthError::SignUp(format!("HTTP {}: {}", status, body)));
        }

        // With autoconfirm the response is a session object; with email
        // confirmation pending it is the bare user record.
        let body: serde_json::Value = response.json().await?;
        if body.get("access_token").is_none() {
            info!(email = %email, "Sign-up accepted, confirmation email pending");
            return Ok(None);
        }

        let data: TokenResponse = serde_json::from_value(body)?;
        let session = self.session_from_token_response(data);
        self.install_session(session.clone());
        self.events.emit(AuthEvent::signed_in(session.clone()));

        info!(user_id = %session.user_id, "Sign-up successful");
        Ok(Some(session))
    }

    /// Request a password-recovery email.
    ///
    /// The email carries a deep link back into the app; `redirect_to` is the
    /// link target the recovery screen is registered under.
    pub async fn reset_password_for_email(&self, email: &str, redirect_to: &str) -> AuthResult<()> {
        let recover_url = format!(
            "{}/auth/v1/recover?redirect_to={}",
            self.supabase_url, redirect_to
        );

        debug!(url = %recover_url, email = %email, "Requesting recovery email");

        let response = self
            .http_client
            .post(&recover_url)
            .header("apikey", &self.publishable_key)
            .header("Content-Type", "application/json")
            .json(&serde_json::json!({ "email": email }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Recovery email request failed");
            return Err(AuthError::Config(format!("HTTP {}: {}", status, body)));
        }

        info!(email = %email, "Recovery email requested");
        Ok(())
    }

    /// Install a session from fragment tokens after verifying them.
    ///
    /// Verifies the access token against the user endpoint so a stale or
    /// tampered link never installs a dead session, then announces the
    /// change with the grant-appropriate event.
    pub async fn set_session(
        &self,
        access_token: &str,
        refresh_token: &str,
        grant: TokenGrant,
    ) -> AuthResult<Session> {
        let user = self.fetch_user(access_token).await?;

        let session = Session {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            user_id: user.id,
            email: user.email,
            expires_at: Utc::now() + Duration::seconds(FRAGMENT_TOKEN_TTL_SECS),
        };
        self.install_session(session.clone());

        match grant {
            TokenGrant::Callback => {
                self.events.emit(AuthEvent::signed_in(session.clone()));
                info!(user_id = %session.user_id, "Session installed from callback tokens");
            }
            TokenGrant::Recovery => {
                self.events.emit(AuthEvent::recovery_requested());
                info!(user_id = %session.user_id, "Recovery session installed");
            }
        }

        Ok(session)
    }

    /// Set a new password for the signed-in user.
    ///
    /// This is the second half of the recovery flow: a recovery-grant
    /// session authorizes exactly this call.
    pub async fn update_password(&self, new_password: &str) -> AuthResult<()> {
        let session = self.session_snapshot().ok_or(AuthError::NotLoggedIn)?;
        let user_url = format!("{}/auth/v1/user", self.supabase_url);

        debug!(url = %user_url, "Updating password");

        let response = self
            .http_client
            .put(&user_url)
            .header("apikey", &self.publishable_key)
            .header("Authorization", format!("Bearer {}", session.access_token))
            .header("Content-Type", "application/json")
            .json(&serde_json::json!({ "password": new_password }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Password update failed");
            return Err(AuthError::SessionInvalid(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        self.events.emit(AuthEvent::user_updated(session.clone()));
        info!(user_id = %session.user_id, "Password updated");
        Ok(())
    }

    /// Refresh the session with exponential backoff retry.
    ///
    /// Transient failures retry; a non-transient failure or exhausted
    /// retries clear the session and announce the sign-out.
    pub async fn refresh(&self) -> AuthResult<Session> {
        let refresh_token = self
            .session_snapshot()
            .ok_or(AuthError::NotLoggedIn)?
            .refresh_token;

        let mut last_error = None;

        for attempt in 0..self.refresh_config.max_retries {
            match self.try_refresh(&refresh_token).await {
                Ok(session) => {
                    self.install_session(session.clone());
                    self.events.emit(AuthEvent::token_refreshed(session.clone()));
                    info!(user_id = %session.user_id, "Token refreshed");
                    return Ok(session);
                }
                Err(e) if e.is_transient() => {
                    last_error = Some(e);

                    if attempt + 1 < self.refresh_config.max_retries {
                        let delay = self.refresh_config.delay_for_attempt(attempt);
                        debug!(
                            attempt = attempt + 1,
                            max_retries = self.refresh_config.max_retries,
                            delay_ms = delay.as_millis(),
                            "Refresh failed with transient error, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => {
                    warn!("Refresh failed with non-transient error: {}", e);
                    self.clear_session();
                    self.events.emit(AuthEvent::signed_out());
                    return Err(e);
                }
            }
        }

        warn!(
            "Refresh failed after {} attempts",
            self.refresh_config.max_retries
        );
        self.clear_session();
        self.events.emit(AuthEvent::signed_out());

        Err(last_error.unwrap_or(AuthError::RefreshExhausted(self.refresh_config.max_retries)))
    }

    /// Single attempt to refresh the session.
    async fn try_refresh(&self, refresh_token: &str) -> AuthResult<Session> {
        let refresh_url = format!(
            "{}/auth/v1/token?grant_type=refresh_token",
            self.supabase_url
        );

        debug!(url = %refresh_url, "Refreshing token");

        let response = self
            .http_client
            .post(&refresh_url)
            .header("apikey", &self.publishable_key)
            .header("Content-Type", "application/json")
            .json(&RefreshRequest {
                refresh_token: refresh_token.to_string(),
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Token refresh failed");
            return Err(AuthError::TokenRefresh(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        let data: TokenResponse = response.json().await?;
        Ok(self.session_from_token_response(data))
    }

    /// Sign out: revoke the session server-side (best effort) and clear it.
    pub async fn sign_out(&self) -> AuthResult<()> {
        if let Some(session) = self.session_snapshot() {
            let logout_url = format!("{}/auth/v1/logout", self.supabase_url);

            let result = self
                .http_client
                .post(&logout_url)
                .header("apikey", &self.publishable_key)
                .header("Authorization", format!("Bearer {}", session.access_token))
                .send()
                .await;

            if let Err(e) = result {
                warn!("Server-side logout failed, clearing session anyway: {}", e);
            }
        }

        self.clear_session();
        self.events.emit(AuthEvent::signed_out());
        info!("Signed out");
        Ok(())
    }

    /// Verify an access token against the user endpoint.
    async fn fetch_user(&self, access_token: &str) -> AuthResult<UserResponse> {
        let user_url = format!("{}/auth/v1/user", self.supabase_url);

        debug!(url = %user_url, "Verifying access token");

        let response = self
            .http_client
            .get(&user_url)
            .header("apikey", &self.publishable_key)
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Access token rejected");
            return Err(AuthError::SessionInvalid(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        Ok(response.json().await?)
    }
}

impl AuthBackend for SupabaseAuth {
    async fn current_session(&self) -> AuthResult<Option<Session>> {
        let Some(session) = self.session_snapshot() else {
            return Ok(None);
        };

        if !session.is_expired() {
            return Ok(Some(session));
        }

        info!("Session expired, attempting refresh");
        let refreshed = self.refresh().await?;
        Ok(Some(refreshed))
    }

    async fn set_session(
        &self,
        access_token: &str,
        refresh_token: &str,
        grant: TokenGrant,
    ) -> AuthResult<Session> {
        SupabaseAuth::set_session(self, access_token, refresh_token, grant).await
    }

    fn subscribe(&self) -> AuthSubscription {
        self.events.subscribe()
    }

    fn unsubscribe(&self, subscription: AuthSubscription) {
        self.events.unsubscribe(subscription);
    }

    fn active_subscriptions(&self) -> usize {
        self.events.active_subscriptions()
    }
}
