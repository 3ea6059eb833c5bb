//! Configuration Loader
//!
//! Layers built-in defaults, an optional TOML file and environment overrides
//! using the `config` crate. Environment keys use the `NOTIFIER` prefix with a
//! double underscore between path segments, e.g. `NOTIFIER__BATCH__MAX_RETRIES=5`.

use config::{Config, Environment, File, FileFormat};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::NotifierConfig;
use crate::error::Result;

const ENV_PREFIX: &str = "NOTIFIER";
const ENV_SEPARATOR: &str = "__";
const DEFAULT_CONFIG_PATH: &str = "config/notifier.toml";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from the default file location and the process environment
    pub fn load() -> Result<NotifierConfig> {
        let path = env::var("NOTIFIER_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_with_overrides(Some(&path), None)
    }

    /// Load configuration from an explicit file plus the process environment
    pub fn load_from_path(path: &Path) -> Result<NotifierConfig> {
        Self::load_with_overrides(Some(path), None)
    }

    /// Load configuration with an explicit environment map instead of the
    /// process environment. Useful in tests that must not mutate global state.
    pub fn load_with_overrides(
        path: Option<&Path>,
        environment: Option<HashMap<String, String>>,
    ) -> Result<NotifierConfig> {
        let mut builder = Config::builder().add_source(Config::try_from(&NotifierConfig::default())?);

        if let Some(path) = path {
            debug!(path = %path.display(), "Loading notifier configuration file if present");
            builder = builder.add_source(
                File::from(path.to_path_buf())
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .try_parsing(true)
                .source(environment),
        );

        let config: NotifierConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}
