//! Log output for the contacts service.
//!
//! The level comes from `logging.level` once configuration is loaded, but
//! tracing has to start before that so config errors are visible. The filter
//! therefore sits behind a reload layer and is swapped in place afterwards.
//! An operator-supplied `RUST_LOG` always takes precedence.

use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

type FilterHandle = reload::Handle<EnvFilter, Registry>;

static FILTER: OnceLock<FilterHandle> = OnceLock::new();

/// Connection-level crates that drown out request logs below `warn`.
const QUIET_TARGETS: &[&str] = &["hyper", "h2", "redis", "deadpool"];

const BOOT_LEVEL: &str = "info";

fn operator_override() -> Option<EnvFilter> {
    std::env::var_os("RUST_LOG")?;
    EnvFilter::try_from_default_env().ok()
}

/// Filter directive for a configured level. Chatty dependencies are held at
/// `warn` unless the service itself is at `off`.
fn directive_for(level: &str) -> String {
    let level = level.trim().to_ascii_lowercase();
    if level == "off" {
        return level;
    }
    QUIET_TARGETS
        .iter()
        .fold(level, |acc, target| format!("{acc},{target}=warn"))
}

fn filter_for(level: &str) -> EnvFilter {
    EnvFilter::try_new(directive_for(level)).unwrap_or_else(|_| EnvFilter::new(BOOT_LEVEL))
}

pub fn init_tracing() {
    init_tracing_with_level(BOOT_LEVEL);
}

/// Installs the global subscriber. Later calls are no-ops, which keeps tests
/// that share a process from fighting over it.
pub fn init_tracing_with_level(level: &str) {
    let filter = operator_override().unwrap_or_else(|| filter_for(level));
    let (layer, handle) = reload::Layer::new(filter);
    if FILTER.set(handle).is_err() {
        return;
    }
    let _ = tracing_subscriber::registry()
        .with(layer)
        .with(fmt::layer().with_target(true))
        .try_init();
}

/// Applies the configured level. Returns false when `RUST_LOG` pins the
/// filter or tracing was set up elsewhere.
pub fn apply_logging_level(level: &str) -> bool {
    if std::env::var_os("RUST_LOG").is_some() {
        return false;
    }
    let Some(handle) = FILTER.get() else {
        return false;
    };
    match handle.reload(filter_for(level)) {
        Ok(()) => {
            tracing::debug!(level, "log level applied");
            true
        }
        Err(error) => {
            tracing::warn!(%error, level, "could not apply log level");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependencies_stay_at_warn() {
        assert_eq!(
            directive_for(" DEBUG "),
            "debug,hyper=warn,h2=warn,redis=warn,deadpool=warn"
        );
    }

    #[test]
    fn off_silences_everything() {
        assert_eq!(directive_for("off"), "off");
    }

    #[test]
    fn every_configurable_level_parses() {
        for level in ["trace", "debug", "info", "warn", "error", "off"] {
            assert!(EnvFilter::try_new(directive_for(level)).is_ok(), "{level}");
        }
    }
}
