//! Client configuration.
//!
//! Loaded from TOML; every section is optional and falls back to defaults.
//! `WEAVE_ENTITY`, `WEAVE_PROJECT` and `WEAVE_LOG_LEVEL` override file values
//! when [`ClientConfig::apply_env`] is called.
//!
//! ```toml
//! entity = "my-team"
//! project = "experiments"
//!
//! [table]
//! page_size = 1000
//! cache_pages = 16
//!
//! [logging]
//! level = "info"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use weave_trace::{DEFAULT_TABLE_CACHE_PAGES, DEFAULT_TABLE_PAGE_SIZE};
use weave_types::split_project_id;

use crate::error::{ClientError, ClientResult};

pub const ENTITY_ENV: &str = "WEAVE_ENTITY";
pub const PROJECT_ENV: &str = "WEAVE_PROJECT";
pub const LOG_LEVEL_ENV: &str = "WEAVE_LOG_LEVEL";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub entity: String,

    #[serde(default)]
    pub project: String,

    #[serde(default)]
    pub table: TableConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Paging for table proxies.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    /// Rows per `table_query` page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Pages each table proxy keeps cached.
    #[serde(default = "default_cache_pages")]
    pub cache_pages: usize,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            cache_pages: default_cache_pages(),
        }
    }
}

fn default_page_size() -> usize {
    DEFAULT_TABLE_PAGE_SIZE
}

fn default_cache_pages() -> usize {
    DEFAULT_TABLE_CACHE_PAGES
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ClientConfig {
    pub fn new(entity: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            project: project.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(text: &str) -> ClientResult<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> ClientResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Apply environment overrides.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(entity) = lookup(ENTITY_ENV) {
            self.entity = entity;
        }
        if let Some(project) = lookup(PROJECT_ENV) {
            self.project = project;
        }
        if let Some(level) = lookup(LOG_LEVEL_ENV) {
            self.logging.level = level;
        }
    }

    /// `"<entity>/<project>"`, validated.
    pub fn project_id(&self) -> ClientResult<String> {
        let project_id = format!("{}/{}", self.entity, self.project);
        split_project_id(&project_id)
            .map_err(|e| ClientError::Config(e.to_string()))?;
        Ok(project_id)
    }
}
