//! The session & routing controller.
//!
//! Owns the route machine and drives it from three event sources: the
//! startup session query, gateway auth-change events, and inbound deep
//! links. Events are applied strictly one at a time; a change event landing
//! while a deep link is being handled is queued and applied after the
//! link's own transition completes.

use auth_gateway::{AuthBackend, AuthEvent, AuthSubscription, TokenGrant};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::deep_link::DeepLink;
use crate::error::{ShellError, ShellResult};
use crate::links::{LinkSource, LinkSubscription};
use crate::navigation::{Navigator, Notifier, Screen};
use crate::route_fsm::{input_for_event, RouteMachine, RouteMachineInput, RouteState};

const CALLBACK_FAILED_NOTICE: &str = "Sign-in link could not be completed. Please try again.";
const RECOVERY_FAILED_NOTICE: &str = "Password reset link could not be opened. Please try again.";

/// Session & routing controller.
///
/// Created once per process. `attach` subscribes to both event sources and
/// resolves the initial route; `run` drives the loop for the process
/// lifetime; `detach` tears the subscriptions down exactly once.
pub struct ShellController<A, N, T>
where
    A: AuthBackend,
    N: Navigator,
    T: Notifier,
{
    backend: Arc<A>,
    navigator: N,
    notifier: T,
    machine: RouteMachine,
    auth_events: Option<AuthSubscription>,
    link_events: Option<LinkSubscription>,
    /// URL captured before initialization completed; most recent wins.
    pending_link: Option<String>,
    initialized: bool,
}

impl<A, N, T> ShellController<A, N, T>
where
    A: AuthBackend,
    N: Navigator,
    T: Notifier,
{
    /// Create a controller in the unresolved route.
    pub fn new(backend: Arc<A>, navigator: N, notifier: T) -> Self {
        Self {
            backend,
            navigator,
            notifier,
            machine: RouteMachine::new(),
            auth_events: None,
            link_events: None,
            pending_link: None,
            initialized: false,
        }
    }

    /// Current route state.
    pub fn route(&self) -> RouteState {
        RouteState::from(self.machine.state())
    }

    /// Subscribe to both event sources and resolve the initial route.
    ///
    /// The startup session query and the launch-URL fetch race; both are
    /// awaited before the route leaves `Unresolved`. A failed session query
    /// is logged and treated as signed out, never surfaced as an error.
    pub async fn attach<L: LinkSource>(&mut self, links: &L) -> ShellResult<()> {
        if self.auth_events.is_some() || self.link_events.is_some() {
            return Err(ShellError::AlreadyAttached);
        }

        self.navigator.mount(self.route().mounted_stack());
        self.auth_events = Some(self.backend.subscribe());
        self.link_events = Some(links.subscribe());

        let (session, launch_url) =
            tokio::join!(self.backend.current_session(), links.launch_url());

        let startup_session = match session {
            Ok(session) => session,
            Err(e) => {
                // Indistinguishable from "never logged in" for the user.
                warn!(error = %e, "Startup session query failed, treating as signed out");
                None
            }
        };

        if let Some(url) = launch_url {
            self.pending_link = Some(url);
        }

        // The launch link goes first: a successful token exchange resolves
        // the route directly, without an intermediate state.
        if let Some(url) = self.pending_link.take() {
            self.process_link(&url).await;
        }
        self.drain_auth_events();

        if self.route() == RouteState::Unresolved {
            let input = if startup_session.is_some() {
                RouteMachineInput::SessionPresent
            } else {
                RouteMachineInput::SessionAbsent
            };
            self.apply_input(&input);
        }

        self.initialized = true;
        info!(route = ?self.route(), "Shell attached");
        Ok(())
    }

    /// Handle an inbound URL.
    ///
    /// Buffered until initialization completes; afterwards parsed and acted
    /// on immediately. Unrecognized URLs are no-ops.
    pub async fn handle_url(&mut self, url: &str) {
        if !self.initialized {
            debug!(url = %url, "Buffering link until initialization completes");
            self.pending_link = Some(url.to_string());
            return;
        }
        self.process_link(url).await;
    }

    /// Drive the controller until either event source closes.
    pub async fn run(&mut self) -> ShellResult<()> {
        let mut auth_events = self.auth_events.take().ok_or(ShellError::NotAttached)?;
        let mut link_events = self.link_events.take().ok_or(ShellError::NotAttached)?;

        loop {
            tokio::select! {
                biased;

                event = auth_events.next_event() => match event {
                    Some(event) => self.apply_auth_event(event),
                    None => break,
                },
                url = link_events.next_url() => match url {
                    Some(url) => self.handle_url(&url).await,
                    None => break,
                },
            }
        }

        self.auth_events = Some(auth_events);
        self.link_events = Some(link_events);
        Ok(())
    }

    /// Tear down both subscriptions. Idempotent; a second call is a no-op.
    pub fn detach<L: LinkSource>(&mut self, links: &L) {
        if let Some(subscription) = self.auth_events.take() {
            self.backend.unsubscribe(subscription);
        }
        if let Some(subscription) = self.link_events.take() {
            links.unsubscribe(subscription);
        }
        self.initialized = false;
    }

    /// Parse and act on a recognized link; ignore anything else.
    async fn process_link(&mut self, url: &str) {
        let Some(link) = DeepLink::parse(url) else {
            debug!(url = %url, "Ignoring unrecognized or incomplete link");
            return;
        };

        match link {
            DeepLink::Recovery {
                access_token,
                refresh_token,
            } => {
                match self
                    .backend
                    .set_session(&access_token, &refresh_token, TokenGrant::Recovery)
                    .await
                {
                    Ok(_) => {
                        // Replace, not push: back-navigation must not reach
                        // a pre-recovery screen.
                        self.navigator.replace_top(Screen::PasswordReset);
                        self.drain_auth_events();
                    }
                    Err(e) => {
                        warn!(error = %e, "Recovery token exchange failed");
                        self.notifier.notify(RECOVERY_FAILED_NOTICE);
                    }
                }
            }
            DeepLink::AuthCallback {
                access_token,
                refresh_token,
            } => {
                match self
                    .backend
                    .set_session(&access_token, &refresh_token, TokenGrant::Callback)
                    .await
                {
                    Ok(_) => {
                        self.navigator.replace_top(Screen::Home);
                        self.drain_auth_events();
                    }
                    Err(e) => {
                        warn!(error = %e, "Callback token exchange failed");
                        self.notifier.notify(CALLBACK_FAILED_NOTICE);
                    }
                }
            }
        }
    }

    /// Apply every already-queued auth event, one at a time.
    fn drain_auth_events(&mut self) {
        loop {
            let event = match self.auth_events.as_mut() {
                Some(subscription) => subscription.try_next(),
                None => None,
            };
            match event {
                Some(event) => self.apply_auth_event(event),
                None => break,
            }
        }
    }

    fn apply_auth_event(&mut self, event: AuthEvent) {
        debug!(change = ?event.change, has_session = event.session.is_some(), "Auth change event");
        let input = input_for_event(&event);
        self.apply_input(&input);
    }

    fn apply_input(&mut self, input: &RouteMachineInput) {
        let old_state = self.route();

        if self.machine.consume(input).is_err() {
            // The transition table is total over (state, input).
            error!(?input, state = ?old_state, "Route transition rejected");
            return;
        }

        let new_state = self.route();
        if old_state != new_state {
            debug!(
                old_state = ?old_state,
                new_state = ?new_state,
                "Route transition"
            );
            self.navigator.mount(new_state.mounted_stack());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::LinkRegistry;
    use crate::navigation::ScreenStack;
    use auth_gateway::{AuthError, AuthEventRegistry, AuthResult, Session};
    use chrono::{Duration, Utc};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn session_with_tokens(access_token: &str, refresh_token: &str) -> Session {
        Session {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            user_id: "user-1".to_string(),
            email: Some("user@example.com".to_string()),
            expires_at: Utc::now() + Duration::hours(1),
        }
    }

    fn test_session() -> Session {
        session_with_tokens("access", "refresh")
    }

    /// In-memory auth backend for driving the controller.
    struct MockBackend {
        registry: AuthEventRegistry,
        startup: Mutex<Option<AuthResult<Option<Session>>>>,
        set_session_calls: AtomicUsize,
        last_tokens: Mutex<Option<(String, String)>>,
        fail_set_session: AtomicBool,
    }

    impl MockBackend {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                registry: AuthEventRegistry::new(),
                startup: Mutex::new(None),
                set_session_calls: AtomicUsize::new(0),
                last_tokens: Mutex::new(None),
                fail_set_session: AtomicBool::new(false),
            })
        }

        fn with_startup(result: AuthResult<Option<Session>>) -> Arc<Self> {
            let backend = Self::new();
            *backend.startup.lock().unwrap() = Some(result);
            backend
        }

        fn emit(&self, event: AuthEvent) {
            self.registry.emit(event);
        }

        fn set_session_calls(&self) -> usize {
            self.set_session_calls.load(Ordering::SeqCst)
        }
    }

    impl AuthBackend for MockBackend {
        async fn current_session(&self) -> AuthResult<Option<Session>> {
            self.startup.lock().unwrap().take().unwrap_or(Ok(None))
        }

        async fn set_session(
            &self,
            access_token: &str,
            refresh_token: &str,
            grant: TokenGrant,
        ) -> AuthResult<Session> {
            self.set_session_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_tokens.lock().unwrap() =
                Some((access_token.to_string(), refresh_token.to_string()));

            if self.fail_set_session.load(Ordering::SeqCst) {
                return Err(AuthError::SessionInvalid("rejected".to_string()));
            }

            let session = session_with_tokens(access_token, refresh_token);
            match grant {
                TokenGrant::Callback => self.registry.emit(AuthEvent::signed_in(session.clone())),
                TokenGrant::Recovery => self.registry.emit(AuthEvent::recovery_requested()),
            }
            Ok(session)
        }

        fn subscribe(&self) -> AuthSubscription {
            self.registry.subscribe()
        }

        fn unsubscribe(&self, subscription: AuthSubscription) {
            self.registry.unsubscribe(subscription);
        }

        fn active_subscriptions(&self) -> usize {
            self.registry.active_subscriptions()
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum NavAction {
        Mounted(ScreenStack),
        Replaced(Screen),
        Pushed(Screen),
    }

    #[derive(Clone, Default)]
    struct RecordingNavigator {
        actions: Arc<Mutex<Vec<NavAction>>>,
    }

    impl RecordingNavigator {
        fn actions(&self) -> Vec<NavAction> {
            self.actions.lock().unwrap().clone()
        }

        fn mounts(&self) -> Vec<ScreenStack> {
            self.actions()
                .into_iter()
                .filter_map(|action| match action {
                    NavAction::Mounted(stack) => Some(stack),
                    _ => None,
                })
                .collect()
        }

        fn clear(&self) {
            self.actions.lock().unwrap().clear();
        }
    }

    impl Navigator for RecordingNavigator {
        fn mount(&self, stack: ScreenStack) {
            self.actions.lock().unwrap().push(NavAction::Mounted(stack));
        }

        fn replace_top(&self, screen: Screen) {
            self.actions
                .lock()
                .unwrap()
                .push(NavAction::Replaced(screen));
        }

        fn navigate_to(&self, screen: Screen) {
            self.actions.lock().unwrap().push(NavAction::Pushed(screen));
        }
    }

    #[derive(Clone, Default)]
    struct RecordingNotifier {
        messages: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingNotifier {
        fn messages(&self) -> Vec<String> {
            self.messages.lock().unwrap().clone()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, message: &str) {
            self.messages.lock().unwrap().push(message.to_string());
        }
    }

    #[derive(Default)]
    struct ScriptedLinks {
        launch: Mutex<Option<String>>,
        registry: LinkRegistry,
    }

    impl ScriptedLinks {
        fn with_launch_url(url: &str) -> Self {
            Self {
                launch: Mutex::new(Some(url.to_string())),
                registry: LinkRegistry::new(),
            }
        }
    }

    impl LinkSource for ScriptedLinks {
        async fn launch_url(&self) -> Option<String> {
            self.launch.lock().unwrap().clone()
        }

        fn subscribe(&self) -> LinkSubscription {
            self.registry.subscribe()
        }

        fn unsubscribe(&self, subscription: LinkSubscription) {
            self.registry.unsubscribe(subscription);
        }
    }

    type TestController = ShellController<MockBackend, RecordingNavigator, RecordingNotifier>;

    fn controller_with(backend: Arc<MockBackend>) -> (TestController, RecordingNavigator, RecordingNotifier) {
        let navigator = RecordingNavigator::default();
        let notifier = RecordingNotifier::default();
        let controller = ShellController::new(backend, navigator.clone(), notifier.clone());
        (controller, navigator, notifier)
    }

    const CALLBACK_URL: &str =
        "com.expressions.app://auth/callback#access_token=AAA&refresh_token=BBB";
    const RECOVERY_URL: &str =
        "com.expressions.app://password-reset#access_token=AAA&refresh_token=BBB&type=recovery";

    #[tokio::test]
    async fn test_subscriptions_bounded_across_attach_detach() {
        let backend = MockBackend::new();
        let links = ScriptedLinks::default();
        let (mut controller, _, _) = controller_with(backend.clone());

        assert_eq!(backend.active_subscriptions(), 0);

        controller.attach(&links).await.unwrap();
        assert_eq!(backend.active_subscriptions(), 1);
        assert_eq!(links.registry.active_subscriptions(), 1);

        // A second attach is a programming error, not a second subscription.
        assert!(matches!(
            controller.attach(&links).await,
            Err(ShellError::AlreadyAttached)
        ));
        assert_eq!(backend.active_subscriptions(), 1);

        controller.detach(&links);
        assert_eq!(backend.active_subscriptions(), 0);
        assert_eq!(links.registry.active_subscriptions(), 0);

        // Detach is idempotent.
        controller.detach(&links);
        assert_eq!(backend.active_subscriptions(), 0);

        // Re-attach after a clean detach works.
        controller.attach(&links).await.unwrap();
        assert_eq!(backend.active_subscriptions(), 1);
    }

    #[tokio::test]
    async fn test_startup_with_existing_session_mounts_home() {
        let backend = MockBackend::with_startup(Ok(Some(test_session())));
        let links = ScriptedLinks::default();
        let (mut controller, navigator, _) = controller_with(backend.clone());

        controller.attach(&links).await.unwrap();

        assert_eq!(controller.route(), RouteState::Authenticated);
        assert_eq!(
            navigator.mounts(),
            vec![ScreenStack::Loading, ScreenStack::Home]
        );
        assert_eq!(backend.set_session_calls(), 0);
    }

    #[tokio::test]
    async fn test_startup_without_session_mounts_auth() {
        let backend = MockBackend::new();
        let links = ScriptedLinks::default();
        let (mut controller, navigator, _) = controller_with(backend);

        controller.attach(&links).await.unwrap();

        assert_eq!(controller.route(), RouteState::Unauthenticated);
        assert_eq!(
            navigator.mounts(),
            vec![ScreenStack::Loading, ScreenStack::Auth]
        );
    }

    #[tokio::test]
    async fn test_startup_query_failure_treated_as_signed_out() {
        let backend = MockBackend::with_startup(Err(AuthError::NetworkUnavailable));
        let links = ScriptedLinks::default();
        let (mut controller, navigator, notifier) = controller_with(backend);

        controller.attach(&links).await.unwrap();

        assert_eq!(controller.route(), RouteState::Unauthenticated);
        assert_eq!(
            navigator.mounts(),
            vec![ScreenStack::Loading, ScreenStack::Auth]
        );
        // Never surfaced to the user.
        assert!(notifier.messages().is_empty());
    }

    #[tokio::test]
    async fn test_launch_link_resolves_directly_to_authenticated() {
        let backend = MockBackend::new();
        let links = ScriptedLinks::with_launch_url(CALLBACK_URL);
        let (mut controller, navigator, _) = controller_with(backend.clone());

        controller.attach(&links).await.unwrap();

        assert_eq!(backend.set_session_calls(), 1);
        assert_eq!(controller.route(), RouteState::Authenticated);
        // Never passes through the auth stack on the way.
        assert_eq!(
            navigator.mounts(),
            vec![ScreenStack::Loading, ScreenStack::Home]
        );
    }

    #[tokio::test]
    async fn test_inbound_callback_while_unauthenticated() {
        let backend = MockBackend::new();
        let links = ScriptedLinks::default();
        let (mut controller, navigator, _) = controller_with(backend.clone());

        controller.attach(&links).await.unwrap();
        assert_eq!(controller.route(), RouteState::Unauthenticated);

        controller.handle_url(CALLBACK_URL).await;

        assert_eq!(backend.set_session_calls(), 1);
        assert_eq!(
            *backend.last_tokens.lock().unwrap(),
            Some(("AAA".to_string(), "BBB".to_string()))
        );
        assert_eq!(controller.route(), RouteState::Authenticated);
        assert!(navigator
            .actions()
            .contains(&NavAction::Replaced(Screen::Home)));
        assert_eq!(navigator.mounts().last(), Some(&ScreenStack::Home));
    }

    #[tokio::test]
    async fn test_inbound_recovery_link_replaces_with_recovery_screen() {
        let backend = MockBackend::new();
        let links = ScriptedLinks::default();
        let (mut controller, navigator, _) = controller_with(backend.clone());

        controller.attach(&links).await.unwrap();
        controller.handle_url(RECOVERY_URL).await;

        assert_eq!(backend.set_session_calls(), 1);
        assert_eq!(controller.route(), RouteState::PasswordRecovery);
        // Replaced, not pushed.
        assert!(navigator
            .actions()
            .contains(&NavAction::Replaced(Screen::PasswordReset)));
        assert!(!navigator
            .actions()
            .iter()
            .any(|action| matches!(action, NavAction::Pushed(_))));
        assert_eq!(navigator.mounts().last(), Some(&ScreenStack::Recovery));
    }

    #[tokio::test]
    async fn test_malformed_recovery_link_is_noop() {
        let backend = MockBackend::new();
        let links = ScriptedLinks::default();
        let (mut controller, navigator, notifier) = controller_with(backend.clone());

        controller.attach(&links).await.unwrap();
        navigator.clear();

        controller
            .handle_url("com.expressions.app://password-reset#access_token=AAA&type=recovery")
            .await;

        assert_eq!(backend.set_session_calls(), 0);
        assert_eq!(controller.route(), RouteState::Unauthenticated);
        assert!(navigator.actions().is_empty());
        assert!(notifier.messages().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_link_is_noop() {
        let backend = MockBackend::new();
        let links = ScriptedLinks::default();
        let (mut controller, navigator, _) = controller_with(backend.clone());

        controller.attach(&links).await.unwrap();
        navigator.clear();

        controller.handle_url("com.expressions.app://camera").await;

        assert_eq!(backend.set_session_calls(), 0);
        assert!(navigator.actions().is_empty());
    }

    #[tokio::test]
    async fn test_set_session_failure_leaves_route_unchanged() {
        let backend = MockBackend::new();
        backend.fail_set_session.store(true, Ordering::SeqCst);
        let links = ScriptedLinks::default();
        let (mut controller, navigator, notifier) = controller_with(backend.clone());

        controller.attach(&links).await.unwrap();
        navigator.clear();

        controller.handle_url(CALLBACK_URL).await;

        assert_eq!(backend.set_session_calls(), 1);
        assert_eq!(controller.route(), RouteState::Unauthenticated);
        assert!(navigator.actions().is_empty());
        assert_eq!(notifier.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_recovery_session_event_forces_reauth() {
        let backend = MockBackend::new();
        let links = ScriptedLinks::default();
        let (mut controller, _, _) = controller_with(backend.clone());

        controller.attach(&links).await.unwrap();

        backend.emit(AuthEvent::recovery_requested());
        controller.drain_auth_events();
        assert_eq!(controller.route(), RouteState::PasswordRecovery);

        // A session arriving mid-recovery must not be adopted.
        backend.emit(AuthEvent::signed_in(test_session()));
        controller.drain_auth_events();
        assert_eq!(controller.route(), RouteState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_sign_out_event_returns_to_auth_stack() {
        let backend = MockBackend::with_startup(Ok(Some(test_session())));
        let links = ScriptedLinks::default();
        let (mut controller, navigator, _) = controller_with(backend.clone());

        controller.attach(&links).await.unwrap();
        assert_eq!(controller.route(), RouteState::Authenticated);

        backend.emit(AuthEvent::signed_out());
        controller.drain_auth_events();

        assert_eq!(controller.route(), RouteState::Unauthenticated);
        assert_eq!(navigator.mounts().last(), Some(&ScreenStack::Auth));
    }

    #[tokio::test]
    async fn test_token_refresh_event_keeps_home_mounted() {
        let backend = MockBackend::with_startup(Ok(Some(test_session())));
        let links = ScriptedLinks::default();
        let (mut controller, navigator, _) = controller_with(backend.clone());

        controller.attach(&links).await.unwrap();
        navigator.clear();

        backend.emit(AuthEvent::token_refreshed(test_session()));
        controller.drain_auth_events();

        assert_eq!(controller.route(), RouteState::Authenticated);
        // No remount for a same-state transition.
        assert!(navigator.actions().is_empty());
    }

    #[tokio::test]
    async fn test_link_before_attach_is_buffered() {
        let backend = MockBackend::new();
        let links = ScriptedLinks::default();
        let (mut controller, _, _) = controller_with(backend.clone());

        controller.handle_url(CALLBACK_URL).await;
        assert_eq!(backend.set_session_calls(), 0);

        controller.attach(&links).await.unwrap();

        assert_eq!(backend.set_session_calls(), 1);
        assert_eq!(controller.route(), RouteState::Authenticated);
    }

    #[tokio::test]
    async fn test_pending_buffer_keeps_most_recent_link() {
        let backend = MockBackend::new();
        let links = ScriptedLinks::default();
        let (mut controller, _, _) = controller_with(backend.clone());

        controller
            .handle_url("com.expressions.app://auth/callback#access_token=OLD&refresh_token=OLD")
            .await;
        controller.handle_url(CALLBACK_URL).await;

        controller.attach(&links).await.unwrap();

        assert_eq!(backend.set_session_calls(), 1);
        assert_eq!(
            *backend.last_tokens.lock().unwrap(),
            Some(("AAA".to_string(), "BBB".to_string()))
        );
    }

    #[tokio::test]
    async fn test_run_applies_queued_events_in_order() {
        let backend = MockBackend::new();
        let links = ScriptedLinks::default();
        let (mut controller, _, _) = controller_with(backend.clone());

        controller.attach(&links).await.unwrap();

        backend.emit(AuthEvent::signed_in(test_session()));
        // Closing the link source ends the run loop after the queued auth
        // event is applied.
        drop(links);

        controller.run().await.unwrap();

        assert_eq!(controller.route(), RouteState::Authenticated);
    }

    #[tokio::test]
    async fn test_run_requires_attach() {
        let backend = MockBackend::new();
        let (mut controller, _, _) = controller_with(backend);

        assert!(matches!(
            controller.run().await,
            Err(ShellError::NotAttached)
        ));
    }

    #[tokio::test]
    async fn test_run_processes_inbound_urls() {
        let backend = MockBackend::new();
        let links = ScriptedLinks::default();
        let (mut controller, navigator, _) = controller_with(backend.clone());

        controller.attach(&links).await.unwrap();

        links.registry.dispatch(CALLBACK_URL);
        drop(links);

        controller.run().await.unwrap();

        assert_eq!(backend.set_session_calls(), 1);
        assert_eq!(controller.route(), RouteState::Authenticated);
        assert!(navigator
            .actions()
            .contains(&NavAction::Replaced(Screen::Home)));
    }
}
