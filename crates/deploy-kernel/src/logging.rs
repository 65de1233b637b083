//! Logging
//!
//! Diagnostics go through `tracing`. Coded lifecycle events go through an
//! [`EventLogger`]; [`TracingEventLogger`] forwards them to `tracing` as well.

use crate::config::LoggingConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub use deploy_artifact::event::{
    EventLogger, LogEvent, LoggedEvent, MemoryEventLogger, Severity, TracingEventLogger,
};

/// Install a global fmt subscriber
///
/// `RUST_LOG` wins over the configured filter. Returns false if a global subscriber was
/// already installed, in which case nothing changes.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    result.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let config = LoggingConfig::default();
        let _ = init_tracing(&config);
        assert!(!init_tracing(&config));
    }
}
