//! Configuration loader

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use std::path::Path;

use super::types::AppConfig;
use crate::common::errors::{ClientError, Result};

/// Load configuration from file and environment variables
///
/// Priority (highest to lowest):
/// 1. Environment variables shaped `APP__SECTION__KEY`
/// 2. Venue shorthands `VENUE_*` (e.g. `VENUE_API_TOKEN`, `VENUE_APP_ID`)
/// 3. Configuration file (TOML format)
/// 4. Default values
pub fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    let mut builder = Config::builder();

    if let Some(path) = config_path {
        if Path::new(path).exists() {
            builder = builder.add_source(File::with_name(path).required(false));
        }
    }

    finish(with_environment(builder))
}

/// Load configuration from a TOML string plus the environment
pub fn load_from_str(toml: &str) -> Result<AppConfig> {
    let builder = Config::builder().add_source(File::from_str(toml, FileFormat::Toml));
    finish(with_environment(builder))
}

/// Load configuration from environment variables only
pub fn load_from_env() -> Result<AppConfig> {
    // Try to load from .env file
    dotenvy::dotenv().ok();
    load_config(None)
}

fn with_environment(builder: ConfigBuilder<DefaultState>) -> ConfigBuilder<DefaultState> {
    builder
        .add_source(
            Environment::with_prefix("APP")
                .separator("__")
                .source(Some(venue_shorthands(std::env::vars()))),
        )
        .add_source(
            Environment::with_prefix("APP")
                .separator("__")
                .try_parsing(true),
        )
}

/// Re-key `VENUE_X` variables as `APP__VENUE__X`
fn venue_shorthands(vars: impl Iterator<Item = (String, String)>) -> config::Map<String, String> {
    vars.filter_map(|(key, value)| {
        key.strip_prefix("VENUE_")
            .filter(|rest| !rest.is_empty())
            .map(|rest| (format!("APP__VENUE__{}", rest), value))
    })
    .collect()
}

fn finish(builder: ConfigBuilder<DefaultState>) -> Result<AppConfig> {
    let config = builder
        .build()
        .map_err(|e| ClientError::Configuration(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| ClientError::Configuration(e.to_string()))
}
