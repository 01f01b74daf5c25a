//! Core configuration and utilities for the Expressions client shell.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{Config, DEFAULT_LINK_SCHEME, DEFAULT_SUPABASE_PUBLISHABLE_KEY, DEFAULT_SUPABASE_URL};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level};
pub use paths::Paths;
