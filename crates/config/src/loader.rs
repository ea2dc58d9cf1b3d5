use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    Error, Result,
    env_subst::substitute_env,
    schema::TickworkConfig,
    validate::{Severity, validate},
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "tickwork.toml",
    "tickwork.yaml",
    "tickwork.yml",
    "tickwork.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<TickworkConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.display().to_string(),
        source,
    })?;
    let raw = substitute_env(&raw);
    let config = parse_config(&raw, path)?;

    let report = validate(&config);
    for diag in &report.diagnostics {
        if diag.severity == Severity::Warning {
            warn!(path = %diag.path, "{}", diag.message);
        }
    }
    if let Some(first) = report
        .diagnostics
        .iter()
        .find(|d| d.severity == Severity::Error)
    {
        return Err(Error::invalid(format!("{}: {}", first.path, first.message)));
    }

    Ok(config)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./tickwork.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/tickwork/tickwork.{toml,yaml,yml,json}` (user-global)
///
/// Returns `TickworkConfig::default()` if no config file is found or the
/// file fails to load.
pub fn discover_and_load() -> TickworkConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    TickworkConfig::default()
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/tickwork/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "tickwork").map(|d| d.config_dir().to_path_buf())
}

/// Serialize `config` as pretty TOML.
pub fn render_toml(config: &TickworkConfig) -> Result<String> {
    Ok(toml::to_string_pretty(config)?)
}

fn parse_config(raw: &str, path: &Path) -> Result<TickworkConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => Err(Error::UnsupportedFormat {
            extension: ext.to_string(),
        }),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_temp(suffix: &str, body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_toml() {
        let file = write_temp(
            ".toml",
            r#"
            [scheduler]
            key_prefix = "app:cron:"

            [store]
            capacity = 64
            "#,
        );
        let cfg = load_config(file.path()).unwrap();
        assert_eq!(cfg.scheduler.key_prefix, "app:cron:");
        assert_eq!(cfg.store.capacity, Some(64));
    }

    #[test]
    fn loads_yaml_and_json() {
        let yaml = write_temp(".yaml", "recovery:\n  url: http://localhost/boot\n");
        let cfg = load_config(yaml.path()).unwrap();
        assert_eq!(cfg.recovery.url.as_deref(), Some("http://localhost/boot"));

        let json = write_temp(".json", r#"{"recovery": {"timeout_secs": 3}}"#);
        let cfg = load_config(json.path()).unwrap();
        assert_eq!(cfg.recovery.timeout_secs, 3);
    }

    #[test]
    fn rejects_unknown_extension() {
        let file = write_temp(".ini", "x=1");
        let err = load_config(file.path()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat { ref extension } if extension == "ini"));
    }

    #[test]
    fn rejects_invalid_values() {
        let file = write_temp(".toml", "[recovery]\ntimeout_secs = 0\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("recovery.timeout_secs"));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_config(Path::new("/nonexistent/tickwork.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/tickwork.toml"));
    }

    #[test]
    fn render_toml_roundtrips_through_parser() {
        let mut cfg = TickworkConfig::default();
        cfg.recovery.url = Some("https://example.com/start".into());
        let rendered = render_toml(&cfg).unwrap();
        let back: TickworkConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(back, cfg);
    }
}
