//! Layered configuration for the session map core (spec §6 "Configuration
//! parameters" plus spec §9's clock-as-dependency note).
//!
//! Modeled on the teacher's file-then-environment layering, scaled down to
//! the one real knob this crate has: `sessionmap_keys_per_op`.

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::clock::{Clock, SystemClock};
use crate::error::ConfigError;

/// Batch size for a single OMAP page read, and the soft cap on
/// `dirty_sessions` that triggers a preemptive save (spec §4.2, §6).
pub const DEFAULT_KEYS_PER_OP: u64 = 1024;

const ENV_KEYS_PER_OP: &str = "SESSIONMAP_KEYS_PER_OP";

#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    sessionmap: Option<FileSection>,
}

#[derive(Debug, Deserialize, Default)]
struct FileSection {
    keys_per_op: Option<u64>,
}

/// The session map's runtime configuration: its one tunable plus the clock
/// dependency every timestamped operation is threaded through.
pub struct SessionMapConfig {
    pub keys_per_op: u64,
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SessionMapConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionMapConfig")
            .field("keys_per_op", &self.keys_per_op)
            .finish_non_exhaustive()
    }
}

impl SessionMapConfig {
    pub fn new(keys_per_op: u64, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        if keys_per_op < 1 {
            return Err(ConfigError::Invalid(
                "keys_per_op must be >= 1".to_string(),
            ));
        }
        Ok(Self { keys_per_op, clock })
    }

    /// Defaults, with a real wall clock — what a production rank wants.
    pub fn production_default() -> Self {
        Self {
            keys_per_op: DEFAULT_KEYS_PER_OP,
            clock: Arc::new(SystemClock),
        }
    }

    /// Loads `path` as TOML (`[sessionmap] keys_per_op = ...`), falling back
    /// to [`DEFAULT_KEYS_PER_OP`] for anything unset, then applies an
    /// environment override from [`ENV_KEYS_PER_OP`], and validates the
    /// result. Always uses [`SystemClock`] — tests construct
    /// [`SessionMapConfig`] directly to inject a [`crate::clock::FakeClock`].
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let mut keys_per_op = DEFAULT_KEYS_PER_OP;

        if path.exists() {
            let text = std::fs::read_to_string(path)?;
            let parsed: FileConfig = toml::from_str(&text)?;
            if let Some(section) = parsed.sessionmap {
                if let Some(v) = section.keys_per_op {
                    keys_per_op = v;
                }
            }
        }

        if let Ok(value) = std::env::var(ENV_KEYS_PER_OP) {
            keys_per_op = value.parse().map_err(|_| {
                ConfigError::Invalid(format!(
                    "{ENV_KEYS_PER_OP} must be a positive integer, got `{value}`"
                ))
            })?;
        }

        Self::new(keys_per_op, Arc::new(SystemClock))
    }
}
