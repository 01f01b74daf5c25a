//! Expressions client shell - hosts the session and routing controller.
//!
//! Screens are rendered elsewhere; this host stands in for the mobile
//! runtime by logging navigation decisions and feeding inbound URLs from
//! stdin (one URL per line), the way the OS link dispatcher would.

use anyhow::Result;
use app_config::{init_logging, Config, Paths};
use auth_gateway::SupabaseAuth;
use clap::Parser;
use session_shell::{
    LinkRegistry, LinkSource, LinkSubscription, Navigator, Notifier, Screen, ScreenStack,
    ShellController,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

/// Expressions shell command-line interface.
#[derive(Parser)]
#[command(name = "expressions-shell")]
#[command(about = "Session and routing shell for the Expressions client")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Base directory for runtime files (config, logs). Defaults to ~/.expressions
    #[arg(long)]
    base_dir: Option<PathBuf>,

    /// URL the process was launched with, if any
    #[arg(long)]
    launch_url: Option<String>,
}

/// Navigator that logs mount/replace/push decisions.
struct LoggingNavigator;

impl Navigator for LoggingNavigator {
    fn mount(&self, stack: ScreenStack) {
        info!(stack = ?stack, "Mounted screen stack");
    }

    fn replace_top(&self, screen: Screen) {
        info!(screen = ?screen, "Replaced top of stack");
    }

    fn navigate_to(&self, screen: Screen) {
        info!(screen = ?screen, "Pushed screen");
    }
}

/// Notifier that logs transient notices.
struct LoggingNotifier;

impl Notifier for LoggingNotifier {
    fn notify(&self, message: &str) {
        info!(message = %message, "Transient notice");
    }
}

/// Link source fed by the process launch URL and stdin lines.
struct StdinLinks {
    launch_url: Option<String>,
    registry: Arc<LinkRegistry>,
}

impl StdinLinks {
    fn new(launch_url: Option<String>) -> Self {
        Self {
            launch_url,
            registry: Arc::new(LinkRegistry::new()),
        }
    }
}

impl LinkSource for StdinLinks {
    async fn launch_url(&self) -> Option<String> {
        self.launch_url.clone()
    }

    fn subscribe(&self) -> LinkSubscription {
        self.registry.subscribe()
    }

    fn unsubscribe(&self, subscription: LinkSubscription) {
        self.registry.unsubscribe(subscription);
    }
}

/// Forward stdin lines to link subscribers until EOF.
async fn pump_stdin(registry: Arc<LinkRegistry>) {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let url = line.trim();
        if url.is_empty() {
            continue;
        }
        debug!(url = %url, "Inbound URL");
        registry.dispatch(url);
    }

    debug!("Link feed closed");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(&cli.log_level);

    // Load configuration
    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    let config = Config::load(&paths)?;

    let backend = Arc::new(SupabaseAuth::new(
        &config.supabase_url,
        &config.supabase_publishable_key,
    ));

    let links = StdinLinks::new(cli.launch_url);
    tokio::spawn(pump_stdin(links.registry.clone()));
    info!(scheme = %config.link_scheme, "Accepting inbound URLs on stdin");

    let mut controller = ShellController::new(backend, LoggingNavigator, LoggingNotifier);
    controller.attach(&links).await?;

    tokio::select! {
        result = controller.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    controller.detach(&links);
    Ok(())
}
