use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use nervous_core::FabricConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Returns the ~/.nervous directory, creating it if needed.
/// Falls back to a local `.nervous` directory if the home directory cannot be determined.
pub fn nervous_data_dir() -> PathBuf {
    match dirs::home_dir() {
        Some(mut path) => {
            path.push(".nervous");
            if let Err(e) = fs::create_dir_all(&path) {
                warn!(error = %e, "Could not create ~/.nervous, falling back to local .nervous");
                return local_fallback();
            }
            path
        }
        None => {
            warn!("Could not determine home directory, falling back to local .nervous");
            local_fallback()
        }
    }
}

fn local_fallback() -> PathBuf {
    let fallback = PathBuf::from(".nervous");
    let _ = fs::create_dir_all(&fallback);
    fallback
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub fabric: FabricConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub maintenance: ScheduleConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub port: u16,
    pub enabled: bool,
    /// Bind 0.0.0.0 instead of loopback (also set by `NERVOUS_PUBLIC`)
    pub public: bool,
    /// Destination neuron for `POST /api/events` bodies that name none
    pub default_destination: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: 3030,
            enabled: true,
            public: false,
            default_destination: "default".to_string(),
        }
    }
}

/// Background schedule. The period comes from `fabric.maintenance.interval_secs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub enabled: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Compact,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn default_path() -> PathBuf {
        let mut path = nervous_data_dir();
        path.push("config.toml");
        path
    }

    /// Load `path`, writing a default config there first if it does not exist.
    pub fn load_or_create(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let config = Config::default();
            config.save(path)?;
            return Ok(config);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config
            .fabric
            .validate()
            .with_context(|| format!("validating config {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let toml = toml::to_string_pretty(self)?;
        fs::write(path, toml).with_context(|| format!("writing config {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("nervous-config-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir.join("config.toml")
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [api]
            port = 9000

            [fabric.colony]
            seed = 7
            "#,
        )
        .unwrap();
        assert_eq!(config.api.port, 9000);
        assert_eq!(config.api.default_destination, "default");
        assert_eq!(config.fabric.colony.seed, Some(7));
        assert_eq!(config.fabric.colony.max_hops, 16);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.maintenance.enabled);
    }

    #[test]
    fn test_missing_file_is_created_with_defaults() {
        let path = scratch("create");
        let config = Config::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.api.port, 3030);

        let reloaded = Config::load_or_create(&path).unwrap();
        assert_eq!(reloaded.fabric.maintenance.interval_secs, config.fabric.maintenance.interval_secs);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_out_of_range_threshold_is_rejected() {
        let path = scratch("invalid");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "[fabric.colony]\nevaporation_rate = 1.5\n").unwrap();

        let err = Config::load_or_create(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("evaporation_rate"));
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
