//! Engine configuration.
//!
//! Layering: compiled defaults, then an optional YAML file, then `ODATA_`
//! environment variables with `__` separating nested keys
//! (`ODATA_PAGINATION__MAX_PAGE_SIZE=50`).

use std::path::Path;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::limits::QueryLimits;

pub const ENV_PREFIX: &str = "ODATA_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PaginationConfig {
    /// Page size when `$top` is absent; `max_page_size` applies if unset.
    pub default_page_size: Option<u64>,
    pub max_page_size: u64,
    /// Records pulled from a driver per round trip.
    pub chunk_size: u64,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_page_size: None,
            max_page_size: 1000,
            chunk_size: 1000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub pagination: PaginationConfig,
    pub limits: QueryLimits,
    pub endpoint: Endpoint,
}

impl EngineConfig {
    /// Load configuration from defaults, `path` (YAML) and the environment.
    ///
    /// # Errors
    /// Returns `Error::Configuration` when a layer cannot be read or the
    /// merged result is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(EngineConfig::default()));
        if let Some(path) = path {
            if !path.is_file() {
                return Err(Error::configuration(
                    "config_not_found",
                    format!("config file does not exist: {}", path.display()),
                ));
            }
            figment = figment.merge(Yaml::file(path));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::from_figment(&figment)
    }

    /// # Errors
    /// Returns `Error::Configuration` for extraction or validation failures.
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let config: EngineConfig = figment
            .extract()
            .map_err(|e| Error::configuration("invalid_config", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns `Error::Configuration` for zero sizes or a default page size
    /// above the maximum.
    pub fn validate(&self) -> Result<()> {
        let pagination = &self.pagination;
        if pagination.max_page_size == 0 || pagination.chunk_size == 0 {
            return Err(Error::configuration(
                "invalid_config",
                "max_page_size and chunk_size must be positive",
            ));
        }
        if let Some(default) = pagination.default_page_size
            && (default == 0 || default > pagination.max_page_size)
        {
            return Err(Error::configuration(
                "invalid_config",
                format!(
                    "default_page_size {default} must be within 1..={}",
                    pagination.max_page_size
                ),
            ));
        }
        Ok(())
    }
}
