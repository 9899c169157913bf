//! Layered configuration: an optional `contentrepo.*` file, then
//! `CONTENTREPO__*` environment variables.

use std::sync::Arc;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::cache::{CacheBackend, DisabledCache, LruCacheBackend};
use crate::dialect::DialectKind;
use crate::error::Result;

pub const CONFIG_BASENAME: &str = "contentrepo";
pub const ENV_PREFIX: &str = "CONTENTREPO";

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Identity of the datasource, part of every cache key.
    pub datasource: String,
    /// SQLite database path, `:memory:` for a private in-memory database.
    pub database: String,
    /// Database product name the dialect is picked from.
    pub dialect: String,
    pub catalog_refresh_secs: u64,
    /// Optimized attributes selected with every result row.
    pub prefetch_attributes: Vec<String>,
    pub cache: CacheConfig,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            datasource: "default".to_string(),
            database: ":memory:".to_string(),
            dialect: "sqlite".to_string(),
            catalog_refresh_secs: 60,
            prefetch_attributes: Vec::new(),
            cache: CacheConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            capacity: 1000,
        }
    }
}

impl RepositoryConfig {
    /// Loads `<basename>.{toml,json,yaml,...}` if present, then applies the
    /// environment on top.
    pub fn load(basename: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::with_name(basename).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("prefetch_attributes"),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }
    pub fn dialect_kind(&self) -> Result<DialectKind> {
        DialectKind::from_product_name(&self.dialect)
    }
    pub fn refresh_window(&self) -> Duration {
        Duration::from_secs(self.catalog_refresh_secs)
    }
    /// A new backend per call. Hand clones of one backend to several
    /// datasources to share it.
    pub fn cache_backend(&self) -> Arc<dyn CacheBackend> {
        if self.cache.enabled {
            Arc::new(LruCacheBackend::new(self.cache.capacity))
        } else {
            Arc::new(DisabledCache)
        }
    }
}
