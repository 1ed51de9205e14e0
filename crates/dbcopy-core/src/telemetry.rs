//! Tracing setup for the `dbcopy` binary and for tests that want log output.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `level` when set. With `json` every event is one
/// JSON object per line and carries the copy session span fields.
/// Only the first call in a process has any effect.
pub fn init_tracing(json: bool, level: Level) {
    // surrealdb is chatty at info; keep it at warn unless RUST_LOG says otherwise
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,dbcopy={level},dbcopy_core={level},model_store={level}"
        ))
    });
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if json {
        registry
            .with(fmt::layer().json().with_current_span(true).with_target(false))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).compact())
            .try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_harmless() {
        init_tracing(false, Level::INFO);
        init_tracing(true, Level::DEBUG);
    }
}
