//! Run configuration.
//!
//! The schema name is an explicit value threaded into the resolver, never a
//! module-wide default. It is loaded from a TOML file and may be overridden
//! by the CLI flag or environment variable.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{OmopgenError, OmopgenResult};
use crate::resolver::DEFAULT_RESCAN_PASSES;

/// Configuration for a resolution run.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Schema name substituted for every `<SCHEMA>` token.
    pub schema: String,
    /// Extra resolution passes over renderer output.
    #[serde(default = "default_rescan_passes")]
    pub rescan_passes: usize,
}

fn default_rescan_passes() -> usize {
    DEFAULT_RESCAN_PASSES
}

impl Config {
    /// Build a config directly from a schema name.
    pub fn with_schema(schema: impl Into<String>) -> OmopgenResult<Self> {
        let config = Self {
            schema: schema.into(),
            rescan_passes: DEFAULT_RESCAN_PASSES,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an explicit path, or discover it at
    /// `./omopgen.toml` then `<config dir>/omopgen/config.toml`.
    pub fn load(path: Option<&Path>) -> OmopgenResult<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::discover().ok_or_else(|| {
                OmopgenError::Config(
                    "no config file found; pass --config or --schema".to_string(),
                )
            })?,
        };
        let raw = fs::read_to_string(&path)?;
        let config: Config = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from("omopgen.toml");
        if local.is_file() {
            return Some(local);
        }
        let user = dirs::config_dir()?.join("omopgen").join("config.toml");
        user.is_file().then_some(user)
    }

    /// A missing or empty schema name is fatal for the whole run.
    fn validate(&self) -> OmopgenResult<()> {
        if self.schema.trim().is_empty() {
            return Err(OmopgenError::Config(
                "schema name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
