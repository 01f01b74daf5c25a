//! Auth backend trait definition.

use crate::events::AuthSubscription;
use crate::session::{Session, TokenGrant};
use crate::AuthResult;

/// Abstract capability surface of the authentication backend.
///
/// The routing shell consumes this trait only; tests substitute an
/// in-memory implementation.
#[allow(async_fn_in_trait)]
pub trait AuthBackend {
    /// Return the current session, if any. Refreshes an expired session
    /// under the hood; a session that cannot be refreshed reports as absent.
    async fn current_session(&self) -> AuthResult<Option<Session>>;

    /// Install a session from fragment tokens and announce it with the
    /// grant-appropriate event.
    async fn set_session(
        &self,
        access_token: &str,
        refresh_token: &str,
        grant: TokenGrant,
    ) -> AuthResult<Session>;

    /// Subscribe to auth change events.
    fn subscribe(&self) -> AuthSubscription;

    /// Tear down a subscription. Consumes the handle, so a subscription
    /// cannot be torn down twice.
    fn unsubscribe(&self, subscription: AuthSubscription);

    /// Number of live subscriptions.
    fn active_subscriptions(&self) -> usize;
}
