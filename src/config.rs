use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::database::StoreSettings;
use crate::environment::EnvironmentPolicy;
use crate::error::MdError;
use crate::fetch::DEFAULT_TIMEOUT_SECS;
use crate::record::default_properties;
use crate::registry::DEFAULT_BASE_URL;

pub const DEFAULT_CONFIG_FILE: &str = "mdbench.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub dbdir: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub properties: Option<Vec<String>>,
    #[serde(default)]
    pub environment: Option<EnvironmentPolicy>,
    #[serde(default)]
    pub collect_triples: Option<bool>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub scratch_dir: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub dbdir: Utf8PathBuf,
    pub base_url: String,
    pub store: StoreSettings,
    pub timeout: Duration,
    pub scratch_dir: Option<Utf8PathBuf>,
}

impl ResolvedConfig {
    pub fn with_dbdir(mut self, dbdir: impl Into<Utf8PathBuf>) -> Self {
        self.dbdir = dbdir.into();
        self
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load `path`, or `mdbench.json` from the working directory when present.
    /// Without either, defaults apply.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, MdError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| MdError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| MdError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, MdError> {
        let schema_version = config.schema_version.unwrap_or(1);
        let dbdir = match config.dbdir {
            Some(dir) => Utf8PathBuf::from(dir),
            None => default_dbdir()?,
        };

        let properties = config.properties.unwrap_or_else(default_properties);
        if properties.is_empty() {
            return Err(MdError::ConfigParse(
                "properties must declare at least one property".to_string(),
            ));
        }
        let environment = config.environment.unwrap_or_default();
        if let EnvironmentPolicy::Cutoff { radius } = environment {
            if !(radius > 0.0) {
                return Err(MdError::ConfigParse(format!(
                    "cutoff radius must be positive, got {radius}"
                )));
            }
        }

        Ok(ResolvedConfig {
            schema_version,
            dbdir,
            base_url: config
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            store: StoreSettings {
                properties,
                environment,
                collect_triples: config.collect_triples.unwrap_or(false),
            },
            timeout: Duration::from_secs(config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            scratch_dir: config.scratch_dir.map(Utf8PathBuf::from),
        })
    }
}

pub fn default_dbdir() -> Result<Utf8PathBuf, MdError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("mdbench")).ok()
        })
        .ok_or_else(|| MdError::Filesystem("unable to resolve cache directory".to_string()))
}
