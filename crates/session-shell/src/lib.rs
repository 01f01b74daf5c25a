//! Session & routing controller for the Expressions client shell.
//!
//! This crate owns the one piece of mutable state the shell has — the
//! current route — and reacts to three event sources: startup, auth-change
//! notifications from the gateway, and inbound deep-link URLs. It decides
//! which screen stack is mounted; the screens themselves live outside.

mod controller;
mod deep_link;
mod error;
mod links;
mod navigation;
mod route_fsm;

pub use controller::ShellController;
pub use deep_link::DeepLink;
pub use error::{ShellError, ShellResult};
pub use links::{LinkRegistry, LinkSource, LinkSubscription};
pub use navigation::{Navigator, Notifier, Screen, ScreenStack};
pub use route_fsm::route_machine;
pub use route_fsm::{RouteMachine, RouteMachineInput, RouteMachineState, RouteState};
