use anyhow::{bail, Context};
use lettrage_core::Money;
use lettrage_import::UnparseableDatePolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE: &str = "lettrage.toml";

/// Settings read from `lettrage.toml`. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawConfig {
    pub tenant_id: Option<String>,
    pub user_id: Option<String>,
    pub tolerance: Option<String>,
    pub database: Option<PathBuf>,
    pub unparseable_dates: Option<UnparseableDatePolicy>,
    pub delimiter: Option<char>,
    pub event_throttle_ms: Option<u64>,
}

/// Resolved settings with defaults applied.
#[derive(Debug, Clone)]
pub struct Config {
    pub tenant_id: String,
    pub user_id: String,
    pub tolerance: Money,
    pub database: PathBuf,
    pub session_file: PathBuf,
    pub unparseable_dates: UnparseableDatePolicy,
    pub delimiter: u8,
    pub event_throttle: Duration,
}

impl Config {
    pub fn resolve(raw: RawConfig, data_dir: &Path) -> anyhow::Result<Self> {
        let tolerance = match raw.tolerance.as_deref() {
            Some(s) => s
                .trim()
                .parse::<Money>()
                .with_context(|| format!("invalid tolerance {s:?}"))?,
            None => Money::from_cents(1),
        };
        if tolerance.as_decimal().is_sign_negative() {
            bail!("tolerance must not be negative");
        }

        let delimiter = raw.delimiter.unwrap_or(',');
        if !delimiter.is_ascii() {
            bail!("delimiter must be a single ASCII character, got {delimiter:?}");
        }

        Ok(Self {
            tenant_id: raw.tenant_id.unwrap_or_else(|| "default".to_string()),
            user_id: raw.user_id.unwrap_or_else(|| "cli".to_string()),
            tolerance,
            database: raw.database.unwrap_or_else(|| data_dir.join("lettrage.db")),
            session_file: data_dir.join("session.json"),
            unparseable_dates: raw.unparseable_dates.unwrap_or_default(),
            delimiter: delimiter as u8,
            event_throttle: Duration::from_millis(raw.event_throttle_ms.unwrap_or(250)),
        })
    }
}

pub fn parse(content: &str) -> anyhow::Result<RawConfig> {
    toml::from_str(content).context("failed to parse configuration")
}

/// Reads `explicit` when given (it must exist), otherwise the default file in
/// `config_dir` if present.
pub fn load(explicit: Option<&Path>, config_dir: &Path, data_dir: &Path) -> anyhow::Result<Config> {
    let raw = match explicit {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read config {}", path.display()))?;
            parse(&content).with_context(|| path.display().to_string())?
        }
        None => {
            let path = config_dir.join(CONFIG_FILE);
            match std::fs::read_to_string(&path) {
                Ok(content) => parse(&content).with_context(|| path.display().to_string())?,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => RawConfig::default(),
                Err(e) => return Err(e).with_context(|| format!("cannot read config {}", path.display())),
            }
        }
    };
    tracing::debug!(?raw, "configuration loaded");
    Config::resolve(raw, data_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_file_is_empty() {
        let config = Config::resolve(parse("").unwrap(), Path::new("/data")).unwrap();
        assert_eq!(config.tenant_id, "default");
        assert_eq!(config.user_id, "cli");
        assert_eq!(config.tolerance, Money::from_cents(1));
        assert_eq!(config.database, PathBuf::from("/data/lettrage.db"));
        assert_eq!(config.session_file, PathBuf::from("/data/session.json"));
        assert_eq!(config.unparseable_dates, UnparseableDatePolicy::Skip);
        assert_eq!(config.delimiter, b',');
        assert_eq!(config.event_throttle, Duration::from_millis(250));
    }

    #[test]
    fn every_key_is_read() {
        let raw = parse(
            r#"
            tenant_id = "acme"
            user_id = "alice"
            tolerance = "0.50"
            database = "/srv/acme.db"
            unparseable_dates = "today"
            delimiter = ";"
            event_throttle_ms = 0
            "#,
        )
        .unwrap();
        let config = Config::resolve(raw, Path::new("/data")).unwrap();
        assert_eq!(config.tenant_id, "acme");
        assert_eq!(config.user_id, "alice");
        assert_eq!(config.tolerance, Money::from_cents(50));
        assert_eq!(config.database, PathBuf::from("/srv/acme.db"));
        assert_eq!(config.unparseable_dates, UnparseableDatePolicy::Today);
        assert_eq!(config.delimiter, b';');
        assert!(config.event_throttle.is_zero());
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(parse("colour = \"red\"").is_err());
        assert!(parse("unparseable_dates = \"guess\"").is_err());
        let raw = parse("tolerance = \"abc\"").unwrap();
        assert!(Config::resolve(raw, Path::new("/data")).is_err());
        let raw = parse("tolerance = \"-1\"").unwrap();
        assert!(Config::resolve(raw, Path::new("/data")).is_err());
    }

    #[test]
    fn missing_default_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(None, dir.path(), dir.path()).unwrap();
        assert_eq!(config.tenant_id, "default");
        assert!(load(Some(&dir.path().join("absent.toml")), dir.path(), dir.path()).is_err());
    }
}
