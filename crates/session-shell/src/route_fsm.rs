//! Route state machine using rust-fsm.
//!
//! The route is an explicit finite state machine rather than a flag derived
//! from "is a session present": the recovery flow needs the machine to
//! remember that a session arriving *while recovering* must force a fresh
//! sign-in instead of being adopted.
//!
//! ## State Diagram
//!
//! ```text
//! ┌─────────────────┐
//! │    Unresolved   │ (initial; loading indicator only)
//! └────────┬────────┘
//!          │ SessionPresent / SessionAbsent / RecoveryMarker
//!          ▼
//! ┌─────────────────┐  SessionPresent   ┌─────────────────┐
//! │ Unauthenticated │ ────────────────► │  Authenticated  │
//! └────────┬────────┘                   └────────┬────────┘
//!          ▲      │ RecoveryMarker               │ SessionAbsent
//!          │      ▼                              ▼
//!          │ ┌──────────────────┐        Unauthenticated
//!          └─│ PasswordRecovery │
//!            └──────────────────┘
//!              SessionPresent forces Unauthenticated (re-auth after
//!              recovery), never Authenticated.
//! ```

use auth_gateway::{AuthChange, AuthEvent};
use rust_fsm::*;

use crate::navigation::ScreenStack;

// Define the FSM using rust-fsm's declarative macro.
// This generates a module `route_machine` with:
// - route_machine::State (enum)
// - route_machine::Input (enum)
// - route_machine::StateMachine (type alias)
state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub route_machine(Unresolved)

    Unresolved => {
        SessionPresent => Authenticated,
        RecoveryMarker => PasswordRecovery,
        SessionAbsent => Unauthenticated
    },
    Unauthenticated => {
        SessionPresent => Authenticated,
        RecoveryMarker => PasswordRecovery,
        SessionAbsent => Unauthenticated
    },
    Authenticated => {
        SessionPresent => Authenticated,
        RecoveryMarker => PasswordRecovery,
        SessionAbsent => Unauthenticated
    },
    PasswordRecovery => {
        // A session arriving mid-recovery must not be silently adopted.
        SessionPresent => Unauthenticated,
        RecoveryMarker => PasswordRecovery,
        SessionAbsent => Unauthenticated
    }
}

// Re-export the generated types with clearer names
pub use route_machine::Input as RouteMachineInput;
pub use route_machine::State as RouteMachineState;
pub use route_machine::StateMachine as RouteMachine;

/// Route state for external consumption.
///
/// Exactly one holds at any time; `Unresolved` only at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteState {
    /// Startup; the session query has not resolved yet.
    Unresolved,
    /// No session; the sign-in entry screen is shown.
    Unauthenticated,
    /// A session is live; the home tab set is shown.
    Authenticated,
    /// A recovery-link session is live solely to set a new password.
    PasswordRecovery,
}

impl RouteState {
    /// Returns true once the startup session query has been settled.
    pub fn is_resolved(&self) -> bool {
        !matches!(self, RouteState::Unresolved)
    }

    /// The screen stack mounted for this route. Pure routing table.
    pub fn mounted_stack(&self) -> ScreenStack {
        match self {
            RouteState::Unresolved => ScreenStack::Loading,
            RouteState::Unauthenticated => ScreenStack::Auth,
            RouteState::Authenticated => ScreenStack::Home,
            RouteState::PasswordRecovery => ScreenStack::Recovery,
        }
    }
}

impl From<&RouteMachineState> for RouteState {
    fn from(state: &RouteMachineState) -> Self {
        match state {
            RouteMachineState::Unresolved => RouteState::Unresolved,
            RouteMachineState::Unauthenticated => RouteState::Unauthenticated,
            RouteMachineState::Authenticated => RouteState::Authenticated,
            RouteMachineState::PasswordRecovery => RouteState::PasswordRecovery,
        }
    }
}

/// Map a tagged auth-change event onto a machine input.
///
/// The recovery marker wins over payload inspection; otherwise only the
/// presence of a session matters, not which change delivered it.
pub(crate) fn input_for_event(event: &AuthEvent) -> RouteMachineInput {
    match (event.change, event.session.is_some()) {
        (AuthChange::RecoveryRequested, _) => RouteMachineInput::RecoveryMarker,
        (_, true) => RouteMachineInput::SessionPresent,
        (_, false) => RouteMachineInput::SessionAbsent,
    }
}
