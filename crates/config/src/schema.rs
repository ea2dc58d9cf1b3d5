//! Config schema types (scheduler keying, recovery endpoint, reference store).

use serde::{Deserialize, Serialize};

/// Default namespace prepended to job names to build store keys.
pub const DEFAULT_KEY_PREFIX: &str = "tickwork:job:";

/// Default timeout for the recovery GET, in seconds.
pub const DEFAULT_RECOVERY_TIMEOUT_SECS: u64 = 10;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TickworkConfig {
    pub scheduler: SchedulerConfig,
    pub recovery: RecoveryConfig,
    pub store: StoreConfig,
}

/// Scheduler core settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Prefix for store keys. Keeps job entries apart from unrelated cache
    /// entries sharing the same store. Defaults to `"tickwork:job:"`.
    pub key_prefix: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.into(),
        }
    }
}

/// Where to send the recovery signal when the host tears the store down.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Bootstrap URL hit with a plain GET. `None` disables the signal.
    pub url: Option<String>,
    /// Request timeout in seconds. Defaults to 10.
    pub timeout_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: DEFAULT_RECOVERY_TIMEOUT_SECS,
        }
    }
}

/// Settings for the bundled in-memory expiring store.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum number of entries before capacity eviction kicks in.
    /// `None` means unbounded.
    pub capacity: Option<usize>,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg: TickworkConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, TickworkConfig::default());
        assert_eq!(cfg.scheduler.key_prefix, DEFAULT_KEY_PREFIX);
        assert!(cfg.recovery.url.is_none());
        assert_eq!(cfg.recovery.timeout_secs, 10);
        assert!(cfg.store.capacity.is_none());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg: TickworkConfig = toml::from_str(
            r#"
            [recovery]
            url = "http://localhost:8080/bootstrap"
            "#,
        )
        .unwrap();
        assert_eq!(
            cfg.recovery.url.as_deref(),
            Some("http://localhost:8080/bootstrap")
        );
        assert_eq!(cfg.recovery.timeout_secs, DEFAULT_RECOVERY_TIMEOUT_SECS);
        assert_eq!(cfg.scheduler.key_prefix, DEFAULT_KEY_PREFIX);
    }
}
