//! Kernel configuration
//!
//! Loaded from TOML. Every section and key is optional and falls back to its default.
//!
//! ```toml
//! [signals]
//! threads = 4
//!
//! [tracker]
//! container_header = "Bundle-Blueprint"
//!
//! [logging]
//! filter = "deploy_kernel=debug,info"
//! json = true
//!
//! [quasi]
//! wildcard = "*"
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level kernel configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub signals: SignalConfig,
    pub tracker: TrackerConfig,
    pub logging: LoggingConfig,
    pub quasi: QuasiConfig,
}

impl KernelConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration from TOML text
    ///
    /// # Errors
    /// Returns error if the text is not valid TOML or a value is out of range
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Set the number of signal worker threads; zero drives signals inline
    #[must_use]
    pub fn with_signal_threads(mut self, threads: usize) -> Self {
        self.signals.threads = threads;
        self
    }

    /// Set the manifest header marking container-powered bundles
    #[must_use]
    pub fn with_container_header(mut self, header: impl Into<String>) -> Self {
        self.tracker.container_header = header.into();
        self
    }

    #[must_use]
    pub fn with_logging_filter(mut self, filter: impl Into<String>) -> Self {
        self.logging.filter = filter.into();
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.tracker.container_header.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "tracker.container_header",
                reason: "must not be empty".to_string(),
            });
        }
        if self.quasi.wildcard.is_empty() {
            return Err(ConfigError::Invalid {
                key: "quasi.wildcard",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Signal executor settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Worker threads; 0 drives signals on the calling thread
    pub threads: usize,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self { threads: 2 }
    }
}

/// Bundle start tracker settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub container_header: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            container_header: "Bundle-Blueprint".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is unset
    pub filter: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuasiConfig {
    /// Marker that turns a region import into a prefix match
    pub wildcard: String,
}

impl Default for QuasiConfig {
    fn default() -> Self {
        Self {
            wildcard: deploy_quasi::WILDCARD.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = KernelConfig::default();
        assert_eq!(config.signals.threads, 2);
        assert_eq!(config.tracker.container_header, "Bundle-Blueprint");
        assert_eq!(config.logging.filter, "info");
        assert!(!config.logging.json);
        assert_eq!(config.quasi.wildcard, "*");
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = KernelConfig::from_toml_str("[signals]\nthreads = 0\n").unwrap();
        assert_eq!(config.signals.threads, 0);
        assert_eq!(config.tracker, TrackerConfig::default());
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            KernelConfig::from_toml_str("[tracker]\ncontainer_header = \"\"\n"),
            Err(ConfigError::Invalid { key: "tracker.container_header", .. })
        ));
        assert!(matches!(
            KernelConfig::from_toml_str("[signals]\nthreads = \"many\"\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nfilter = \"debug\"\njson = true").unwrap();
        let config = KernelConfig::load(file.path()).unwrap();
        assert_eq!(config.logging.filter, "debug");
        assert!(config.logging.json);

        let missing = KernelConfig::load(file.path().with_extension("absent"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn builders() {
        let config = KernelConfig::new()
            .with_signal_threads(8)
            .with_container_header("Spring-Context")
            .with_logging_filter("warn");
        assert_eq!(config.signals.threads, 8);
        assert_eq!(config.tracker.container_header, "Spring-Context");
        assert_eq!(config.logging.filter, "warn");
    }
}
