//! Navigation seams exposed to the screen set.

/// Top-level screen stacks the controller can mount.
///
/// Exactly one is mounted at a time; which one is a pure function of the
/// route state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenStack {
    /// Neutral loading indicator; no screens mounted.
    Loading,
    /// Sign-in entry screen.
    Auth,
    /// Home tab set plus its reachable secondary screens.
    Home,
    /// Password-recovery screen, reachable only via forced navigation.
    Recovery,
}

/// Screens implemented outside this crate, addressed by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    SignIn,
    Home,
    Stats,
    History,
    Profile,
    Chat,
    Camera,
    Terms,
    PasswordReset,
}

/// Navigation handle the hosting framework provides.
///
/// Screens never mutate route state through this; they trigger gateway
/// calls whose change events flow back through the controller.
pub trait Navigator {
    /// Swap the mounted screen stack.
    fn mount(&self, stack: ScreenStack);

    /// Replace the current top-of-stack entry. Back-navigation cannot
    /// return to the replaced screen.
    fn replace_top(&self, screen: Screen);

    /// Push a screen onto the current stack.
    fn navigate_to(&self, screen: Screen);
}

/// Transient, auto-dismissing user notification surface.
pub trait Notifier {
    fn notify(&self, message: &str);
}
