use std::env;

use anyhow::Context;
use rolodex_server::config::loader::{DEFAULT_CONFIG_FILE, load_config};
use rolodex_server::{RolodexServer, build_app, build_state};

/// How the configuration path was determined.
#[derive(Debug, Clone, Copy)]
enum ConfigSource {
    /// From --config CLI argument
    CliArgument,
    /// From ROLODEX_CONFIG environment variable
    EnvironmentVariable,
    /// Optional rolodex.toml in the working directory
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CliArgument => write!(f, "CLI argument (--config)"),
            Self::EnvironmentVariable => write!(f, "environment variable (ROLODEX_CONFIG)"),
            Self::Default => write!(f, "default"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv()
        && !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
    {
        eprintln!("Warning: Failed to load .env file: {e}");
    }

    rolodex_server::init_tracing();

    let (config_path, source) = resolve_config_path();
    let cfg = match load_config(config_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };
    tracing::info!(
        path = config_path.as_deref().unwrap_or(DEFAULT_CONFIG_FILE),
        source = %source,
        "Configuration loaded"
    );

    rolodex_server::apply_logging_level(&cfg.logging.level);
    rolodex_server::metrics::init_metrics();

    let state = build_state(&cfg)
        .await
        .context("failed to build application state")?;
    tracing::info!(
        store = state.cache.backend().store_kind(),
        enabled = state.cache.backend().is_enabled(),
        "Cache backend ready"
    );

    let addr = cfg
        .addr()
        .map_err(anyhow::Error::msg)
        .context("invalid listen address")?;
    let app = build_app(state, &cfg.server);
    RolodexServer::new(addr, app).run().await
}

fn resolve_config_path() -> (Option<String>, ConfigSource) {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config"
            && let Some(path) = args.next()
        {
            return (Some(path), ConfigSource::CliArgument);
        }
    }

    if let Ok(path) = env::var("ROLODEX_CONFIG")
        && !path.is_empty()
    {
        return (Some(path), ConfigSource::EnvironmentVariable);
    }

    (None, ConfigSource::Default)
}
