use std::fs;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::batch::DEFAULT_BATCH_SIZE;
use crate::error::QueryError;

pub const CONFIG_FILE: &str = "kira-bq.json";
pub const HOST_ENV: &str = "KIRA_BQ_HOST";
pub const DEFAULT_HOSTNAME: &str = "http://127.0.0.1:7379";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub hostname: String,
    pub batch_size: usize,
    pub timeout: Duration,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads the explicit path, else `./kira-bq.json`, else the user config
    /// file, else defaults. `KIRA_BQ_HOST` overrides the hostname.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, QueryError> {
        let config = match Self::locate(path) {
            Some(config_path) => Self::read(&config_path)?,
            None => {
                if let Some(path) = path {
                    return Err(QueryError::ConfigRead(path.into()));
                }
                Config::default()
            }
        };
        let host_override = std::env::var(HOST_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty());
        Self::resolve_config(config, host_override)
    }

    pub fn resolve_config(
        config: Config,
        host_override: Option<String>,
    ) -> Result<ResolvedConfig, QueryError> {
        let hostname = host_override
            .or(config.hostname)
            .unwrap_or_else(|| DEFAULT_HOSTNAME.to_string())
            .trim()
            .trim_end_matches('/')
            .to_string();
        if !(hostname.starts_with("http://") || hostname.starts_with("https://")) {
            return Err(QueryError::InvalidHostname(hostname));
        }

        let batch_size = config.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        if batch_size == 0 {
            return Err(QueryError::InvalidBatchSize(batch_size));
        }

        Ok(ResolvedConfig {
            hostname,
            batch_size,
            timeout: Duration::from_secs(config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
        })
    }

    fn locate(path: Option<&str>) -> Option<Utf8PathBuf> {
        if let Some(path) = path {
            let path = Utf8PathBuf::from(path);
            return path.as_std_path().exists().then_some(path);
        }
        let local = Utf8PathBuf::from(CONFIG_FILE);
        if local.as_std_path().exists() {
            return Some(local);
        }
        BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.config_dir().join("kira-bq").join("config.json"))
                    .ok()
            })
            .filter(|path| path.as_std_path().exists())
    }

    fn read(path: &Utf8PathBuf) -> Result<Config, QueryError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|_| QueryError::ConfigRead(path.clone().into_std_path_buf()))?;
        serde_json::from_str(&content).map_err(|err| QueryError::ConfigParse(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn defaults_apply() {
        let resolved = ConfigLoader::resolve_config(Config::default(), None).unwrap();
        assert_eq!(resolved.hostname, DEFAULT_HOSTNAME);
        assert_eq!(resolved.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(resolved.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
    }

    #[test]
    fn host_override_wins() {
        let config = Config {
            hostname: Some("http://db.internal:7379/".to_string()),
            ..Config::default()
        };
        let resolved =
            ConfigLoader::resolve_config(config, Some("https://other:443".to_string())).unwrap();
        assert_eq!(resolved.hostname, "https://other:443");
    }

    #[test]
    fn zero_batch_size_is_invalid() {
        let config = Config {
            batch_size: Some(0),
            ..Config::default()
        };
        assert_matches!(
            ConfigLoader::resolve_config(config, None),
            Err(QueryError::InvalidBatchSize(0))
        );
    }
}
