//! Effective configuration with provenance
//!
//! Records the merged document and which files contributed to it, each
//! with the SHA-256 of its raw bytes, so a run can be traced back to the
//! exact configuration it used.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::defaults::BuiltinDefaults;
use super::merge::merge_layers;
use super::settings::Settings;

/// Repo config file name, looked up in the current directory.
pub const REPO_CONFIG_FILE: &str = "np.toml";

/// Origin of a configuration source
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    Host,
    Repo,
    Cli,
}

/// A contributing layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    /// File path (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 of the raw file bytes (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Merged configuration and where it came from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub created_at: DateTime<Utc>,

    /// The merged document
    pub config: Value,

    /// Contributing layers in precedence order
    pub sources: Vec<ConfigSource>,
}

/// Default host config location.
pub fn host_config_path() -> Option<PathBuf> {
    let base = match env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        Some(dir) => PathBuf::from(dir),
        None => PathBuf::from(env::var_os("HOME")?).join(".config"),
    };
    Some(base.join("np").join("np.toml"))
}

impl EffectiveConfig {
    /// Merge the layers. Missing host or repo files are skipped.
    pub fn build(
        host_config_path: Option<&Path>,
        repo_config_path: Option<&Path>,
        cli_overrides: Option<Value>,
    ) -> Result<Self, ConfigError> {
        let mut layers = vec![BuiltinDefaults::default().to_value()];
        let mut sources = vec![ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
            digest: None,
        }];

        for (origin, path) in [
            (ConfigOrigin::Host, host_config_path),
            (ConfigOrigin::Repo, repo_config_path),
        ] {
            let Some(path) = path.filter(|p| p.exists()) else {
                continue;
            };
            let (value, digest) = Self::load_toml_file(path)?;
            layers.push(value);
            sources.push(ConfigSource {
                origin,
                path: Some(path.to_string_lossy().to_string()),
                digest: Some(digest),
            });
        }

        if let Some(cli) = cli_overrides {
            layers.push(cli);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        let config = Self {
            created_at: Utc::now(),
            config: merge_layers(layers),
            sources,
        };
        config.settings()?;
        Ok(config)
    }

    /// Typed, validated settings.
    pub fn settings(&self) -> Result<Settings, ConfigError> {
        let settings: Settings = serde_json::from_value(self.config.clone())
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        settings.validate().map_err(ConfigError::ValidationError)?;
        Ok(settings)
    }

    /// Load a TOML file, returning its JSON form and digest.
    fn load_toml_file(path: &Path) -> Result<(Value, String), ConfigError> {
        let bytes = fs::read(path).map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let digest = hex::encode(hasher.finalize());

        let contents = String::from_utf8(bytes)
            .map_err(|e| ConfigError::ParseError(format!("{}: invalid UTF-8: {}", path.display(), e)))?;
        let value: toml::Value = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))?;

        Ok((Self::toml_to_json(value), digest))
    }

    fn toml_to_json(toml: toml::Value) -> Value {
        match toml {
            toml::Value::String(s) => Value::String(s),
            toml::Value::Integer(i) => Value::Number(i.into()),
            toml::Value::Float(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            toml::Value::Boolean(b) => Value::Bool(b),
            toml::Value::Datetime(dt) => Value::String(dt.to_string()),
            toml::Value::Array(items) => Value::Array(items.into_iter().map(Self::toml_to_json).collect()),
            toml::Value::Table(table) => Value::Object(
                table
                    .into_iter()
                    .map(|(k, v)| (k, Self::toml_to_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Value at a dot-separated path.
    pub fn get(&self, path: &str) -> Option<&Value> {
        path.split('.').try_fold(&self.config, |current, part| current.get(part))
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    pub fn get_u64(&self, path: &str) -> Option<u64> {
        self.get(path).and_then(Value::as_u64)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_only() {
        let config = EffectiveConfig::build(None, None, None).unwrap();
        assert_eq!(config.get_str("workdir"), Some(".np"));
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].origin, ConfigOrigin::Builtin);

        let settings = config.settings().unwrap();
        assert_eq!(settings.trees_dir(), PathBuf::from(".np/trees"));
        assert_eq!(settings.cache_dir(), PathBuf::from(".np/cache"));
    }

    #[test]
    fn test_repo_file_and_cli() {
        let mut repo = NamedTempFile::new().unwrap();
        writeln!(repo, "workdir = \"patches\"").unwrap();
        writeln!(repo, "[build]").unwrap();
        writeln!(repo, "jobs = 3").unwrap();
        writeln!(repo, "[[drivers]]").unwrap();
        writeln!(repo, "name = \"ixgbe\"").unwrap();
        writeln!(repo, "kind = \"external\"").unwrap();
        writeln!(repo, "version = \"3.11.33\"").unwrap();

        let cli = serde_json::json!({"build": {"jobs": 7}, "workdir": null});
        let config = EffectiveConfig::build(None, Some(repo.path()), Some(cli)).unwrap();

        assert_eq!(config.sources.len(), 3);
        assert_eq!(config.sources[1].origin, ConfigOrigin::Repo);
        assert_eq!(config.sources[1].digest.as_ref().unwrap().len(), 64);
        assert_eq!(config.get_u64("build.jobs"), Some(7));

        let settings = config.settings().unwrap();
        assert_eq!(settings.workdir, PathBuf::from("patches"));
        assert_eq!(settings.driver_key("ixgbe").unwrap().field(), "ixgbe:3.11.33");
        assert_eq!(settings.driver_key("e1000e").unwrap().field(), "e1000e");
    }

    #[test]
    fn test_missing_files_skipped() {
        let config = EffectiveConfig::build(
            Some(Path::new("/nonexistent/np.toml")),
            Some(Path::new("/nonexistent/repo/np.toml")),
            None,
        )
        .unwrap();
        assert_eq!(config.sources.len(), 1);
    }

    #[test]
    fn test_validation() {
        let zero_jobs = serde_json::json!({"build": {"jobs": 0}});
        let err = EffectiveConfig::build(None, None, Some(zero_jobs)).unwrap_err();
        assert!(err.to_string().contains("build.jobs"));

        let bad_format = serde_json::json!({"reference": {"branch_format": "netmap"}});
        let err = EffectiveConfig::build(None, None, Some(bad_format)).unwrap_err();
        assert!(err.to_string().contains("branch_format"));

        let bad_driver = serde_json::json!({"drivers": [{"name": "e1000e--x"}]});
        assert!(EffectiveConfig::build(None, None, Some(bad_driver)).is_err());
    }

    #[test]
    fn test_parse_error() {
        let mut repo = NamedTempFile::new().unwrap();
        writeln!(repo, "workdir = ").unwrap();
        assert!(matches!(
            EffectiveConfig::build(None, Some(repo.path()), None),
            Err(ConfigError::ParseError(_))
        ));
    }
}
