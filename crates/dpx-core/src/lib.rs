//! dpx Core - Domain types, the harvesting pipeline and resource profiling.
//!
//! This crate provides:
//!
//! - **Domain models**: [`Portal`], [`Package`], [`Resource`], [`Table`]
//! - **Pipeline**: [`pagination`], [`BoundedFetcher`], [`profiler`] and the
//!   [`HarvestService`] orchestrator
//! - **Inference**: [`dates`] detects date columns and their range
//! - **Traits**: [`CatalogClient`], [`TableFetcher`], [`CheckpointSink`]
//!   for the collaborators implemented in `dpx-client` and `dpx-cli`

pub mod config;
pub mod dates;
pub mod error;
pub mod fetcher;
pub mod harvest;
pub mod models;
pub mod pagination;
pub mod profiler;
pub mod progress;
pub mod summary;
pub mod table;
pub mod traits;

pub use config::{
    default_config_path, load_explorer_config, parse_explorer_config, ExplorerConfig,
    HarvestConfig, HttpConfig, PortalEntry, PortalRegistry,
};
pub use dates::{infer_date_range, DateRange};
pub use error::{AppError, ErrorKind};
pub use fetcher::{BatchOutcome, BoundedFetcher};
pub use harvest::{ClientRegistry, HarvestResults, HarvestService, PagePlan, StageOutput};
pub use models::{DataFormats, FacetKind, FormatFamily, Package, PageRequest, Portal, Resource};
pub use progress::{HarvestEvent, ProgressReporter, SilentReporter, TracingReporter};
pub use summary::{HarvestSummary, StageReport, StageStats};
pub use table::{Cell, Column, ColumnType, Table};
pub use traits::{CatalogClient, CatalogClientFactory, CheckpointSink, TableFetcher};
