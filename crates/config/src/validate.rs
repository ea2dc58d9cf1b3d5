//! Semantic validation of a parsed [`TickworkConfig`].

use crate::schema::TickworkConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "recovery.url"
    pub path: String,
    pub message: String,
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    fn push(&mut self, severity: Severity, path: &str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            path: path.to_string(),
            message: message.into(),
        });
    }
}

/// Check value ranges and the recovery URL.
#[must_use]
pub fn validate(config: &TickworkConfig) -> ValidationResult {
    let mut result = ValidationResult::default();

    if config.scheduler.key_prefix.trim().is_empty() {
        result.push(
            Severity::Error,
            "scheduler.key_prefix",
            "must not be empty; job keys would collide with other store entries",
        );
    }

    if config.recovery.timeout_secs == 0 {
        result.push(Severity::Error, "recovery.timeout_secs", "must be > 0");
    }

    match config.recovery.url.as_deref() {
        Some(raw) => match url::Url::parse(raw) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {},
            Ok(parsed) => result.push(
                Severity::Error,
                "recovery.url",
                format!("unsupported scheme '{}', expected http or https", parsed.scheme()),
            ),
            Err(e) => result.push(Severity::Error, "recovery.url", format!("invalid URL: {e}")),
        },
        None => result.push(
            Severity::Warning,
            "recovery.url",
            "not set; jobs lost to a store teardown will not be re-registered automatically",
        ),
    }

    if config.store.capacity == Some(0) {
        result.push(Severity::Error, "store.capacity", "must be > 0 when set");
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_only_warn_about_recovery() {
        let result = validate(&TickworkConfig::default());
        assert!(!result.has_errors());
        assert_eq!(result.count(Severity::Warning), 1);
        assert_eq!(result.diagnostics[0].path, "recovery.url");
    }

    #[test]
    fn flags_every_bad_field() {
        let mut cfg = TickworkConfig::default();
        cfg.scheduler.key_prefix = "  ".into();
        cfg.recovery.timeout_secs = 0;
        cfg.recovery.url = Some("ftp://host/boot".into());
        cfg.store.capacity = Some(0);

        let result = validate(&cfg);
        assert_eq!(result.count(Severity::Error), 4);
        let paths: Vec<_> = result.diagnostics.iter().map(|d| d.path.as_str()).collect();
        assert!(paths.contains(&"scheduler.key_prefix"));
        assert!(paths.contains(&"recovery.timeout_secs"));
        assert!(paths.contains(&"recovery.url"));
        assert!(paths.contains(&"store.capacity"));
    }

    #[test]
    fn rejects_unparseable_url() {
        let mut cfg = TickworkConfig::default();
        cfg.recovery.url = Some("not a url".into());
        let result = validate(&cfg);
        assert!(result.has_errors());
    }
}
