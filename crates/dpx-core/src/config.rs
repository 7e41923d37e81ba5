//! Configuration types for dpx components.
//!
//! Portal definitions, the namespace prefix, the worker pool size and the
//! parsable format lists are read from a TOML file, by default
//! `~/.config/dpx/portals.toml`:
//!
//! ```toml
//! namespace = "dpe"
//! workers = 8
//!
//! [data_formats]
//! text = ["csv", "tsv"]
//! excel = ["xls", "xlsx"]
//!
//! [[portals]]
//! id = "data.gov.uk"
//! url = "https://ckan.publishing.service.gov.uk/"
//! themes = "theme-primary"
//! offset_param = "offset"
//! limit_param = "limit"
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::AppError;
use crate::models::{DataFormats, Portal, DEFAULT_LIMIT_PARAM, DEFAULT_OFFSET_PARAM};

/// Default page size for `package_search`.
pub const DEFAULT_PAGE_SIZE: u64 = 100;

/// Worker count used when the configuration leaves it unset.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 5)
        .unwrap_or(10)
}

/// HTTP client configuration for external API calls.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    /// Largest resource payload read into memory, in bytes.
    pub max_download_bytes: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(500),
            max_download_bytes: 256 * 1024 * 1024,
        }
    }
}

/// Run-wide harvesting settings. Read-only once the run starts.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// Prefix for fields the harvester injects into packages and resources.
    pub namespace: String,
    /// Worker pool size; `None` falls back to [`default_workers`].
    pub workers: Option<usize>,
    /// Rows requested per `package_search` page.
    pub page_size: u64,
    /// Overall package limit per portal, 0 meaning unlimited.
    pub limit: u64,
    pub data_formats: DataFormats,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            namespace: "dpe".to_string(),
            workers: None,
            page_size: DEFAULT_PAGE_SIZE,
            limit: 0,
            data_formats: DataFormats::new(["csv"], ["xls", "xlsx"]),
        }
    }
}

impl HarvestConfig {
    /// Effective worker count.
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(default_workers)
    }
}

/// One `[[portals]]` entry of the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct PortalEntry {
    pub id: String,
    pub url: String,
    pub themes: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub offset_param: Option<String>,
    #[serde(default)]
    pub limit_param: Option<String>,
}

fn default_true() -> bool {
    true
}

impl PortalEntry {
    /// Converts the entry into a registry portal.
    pub fn to_portal(&self) -> Portal {
        Portal::new(&self.id, &self.url, &self.themes).with_paging_params(
            self.offset_param.as_deref().unwrap_or(DEFAULT_OFFSET_PARAM),
            self.limit_param.as_deref().unwrap_or(DEFAULT_LIMIT_PARAM),
        )
    }
}

/// Parsed configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct ExplorerConfig {
    pub namespace: String,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub data_formats: DataFormats,
    #[serde(default)]
    pub portals: Vec<PortalEntry>,
}

impl ExplorerConfig {
    /// Returns only the enabled portals.
    pub fn enabled_portals(&self) -> Vec<&PortalEntry> {
        self.portals.iter().filter(|p| p.enabled).collect()
    }

    /// Builds the run-wide harvest settings.
    pub fn harvest_config(&self, page_size: u64, limit: u64) -> HarvestConfig {
        HarvestConfig {
            namespace: self.namespace.clone(),
            workers: self.workers,
            page_size,
            limit,
            data_formats: self.data_formats.clone(),
        }
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.namespace.trim().is_empty() {
            return Err(AppError::InvalidConfig("namespace must not be empty".to_string()));
        }
        if self.workers == Some(0) {
            return Err(AppError::InvalidConfig("workers must be at least 1".to_string()));
        }
        let mut seen = HashSet::new();
        for portal in &self.portals {
            if !seen.insert(portal.id.as_str()) {
                return Err(AppError::InvalidConfig(format!(
                    "duplicate portal id: {}",
                    portal.id
                )));
            }
            url::Url::parse(&portal.url)
                .map_err(|_| AppError::InvalidPortalUrl(portal.url.clone()))?;
        }
        Ok(())
    }
}

/// Immutable set of portals for one run.
#[derive(Debug, Clone, Default)]
pub struct PortalRegistry {
    portals: Vec<Arc<Portal>>,
}

impl PortalRegistry {
    pub fn new(portals: impl IntoIterator<Item = Portal>) -> Self {
        Self {
            portals: portals.into_iter().map(Arc::new).collect(),
        }
    }

    /// Registry of the enabled portals of a configuration file.
    pub fn from_config(config: &ExplorerConfig) -> Self {
        Self::new(config.enabled_portals().into_iter().map(PortalEntry::to_portal))
    }

    pub fn portals(&self) -> &[Arc<Portal>] {
        &self.portals
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Portal>> {
        self.portals.iter().find(|p| p.id == id)
    }

    pub fn len(&self) -> usize {
        self.portals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.portals.is_empty()
    }
}

/// Default location of the configuration file.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("dpx").join("portals.toml"))
}

/// Loads and validates the configuration file.
///
/// With `path = None` the default location is used and a missing file yields
/// `Ok(None)`. An explicit path that does not exist is an error.
pub fn load_explorer_config(path: Option<&Path>) -> Result<Option<ExplorerConfig>, AppError> {
    let (path, explicit) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => match default_config_path() {
            Some(p) => (p, false),
            None => return Ok(None),
        },
    };

    if !path.exists() {
        if explicit {
            return Err(AppError::ConfigError(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        debug!("No config file at {}", path.display());
        return Ok(None);
    }

    let content = std::fs::read_to_string(&path)
        .map_err(|e| AppError::ConfigError(format!("{}: {}", path.display(), e)))?;
    let config = parse_explorer_config(&content)?;
    debug!(
        "Loaded {} portals from {}",
        config.portals.len(),
        path.display()
    );
    Ok(Some(config))
}

/// Parses and validates configuration from a TOML string.
pub fn parse_explorer_config(content: &str) -> Result<ExplorerConfig, AppError> {
    let config: ExplorerConfig =
        toml::from_str(content).map_err(|e| AppError::InvalidConfig(e.to_string()))?;
    config.validate()?;
    Ok(config)
}
