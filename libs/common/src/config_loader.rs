//! Layered configuration loading
//!
//! Priority (highest to lowest):
//! 1. Environment variables (`<PREFIX>SECTION__KEY`)
//! 2. Config file (YAML, TOML or JSON by extension)
//! 3. `T::default()`

use std::path::Path;

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Build the figment for `path` without extracting it
pub fn figment_for<T, P>(path: Option<P>, env_prefix: &str) -> Result<Figment>
where
    T: Serialize + Default,
    P: AsRef<Path>,
{
    let mut figment = Figment::from(Serialized::defaults(T::default()));

    if let Some(path) = path {
        let path = path.as_ref();
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let extension = path.extension().and_then(|s| s.to_str()).unwrap_or_default();
            figment = match extension {
                "yaml" | "yml" => figment.merge(Yaml::file(path)),
                "toml" => figment.merge(Toml::file(path)),
                "json" => figment.merge(Json::file(path)),
                other => {
                    return Err(Error::Config(format!(
                        "Unsupported config file format: '{}' ({})",
                        other,
                        path.display()
                    )))
                },
            };
        } else {
            warn!("Config file {} not found, using defaults", path.display());
        }
    }

    Ok(figment.merge(Env::prefixed(env_prefix).split("__")))
}

/// Load `T` from defaults, an optional file and prefixed environment variables
pub fn load_config<T, P>(path: Option<P>, env_prefix: &str) -> Result<T>
where
    T: Serialize + for<'de> Deserialize<'de> + Default,
    P: AsRef<Path>,
{
    figment_for::<T, P>(path, env_prefix)?
        .extract()
        .map_err(|e| Error::Config(format!("Failed to load configuration: {}", e)))
}
