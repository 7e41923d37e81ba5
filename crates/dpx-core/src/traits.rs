//! Trait definitions for external collaborators.
//!
//! The pipeline never talks to a catalog, a download or a file directly.
//! It goes through these traits, so tests can substitute in-memory fakes
//! and the CLI can plug in the HTTP implementations from `dpx-client`.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;

use serde_json::Value;

use crate::models::{FormatFamily, Package, Portal};
use crate::table::Table;
use crate::AppError;

/// Remote operations against one catalog portal.
///
/// Implementations report transport failures as `AppError::Connection` or
/// `AppError::Timeout`, and API-level failures as `AppError::RemoteApi`.
pub trait CatalogClient: Send + Sync + Clone + 'static {
    /// Total number of packages the portal exposes through search.
    fn count_packages(&self) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// One page of package records.
    ///
    /// # Arguments
    ///
    /// * `offset` - Index of the first package of the page
    /// * `page_size` - Maximum number of packages to return
    fn search_packages(
        &self,
        offset: u64,
        page_size: u64,
    ) -> impl Future<Output = Result<Vec<Package>, AppError>> + Send;

    /// Value to count mapping for a facet field.
    fn facet_counts(
        &self,
        facet_field: &str,
    ) -> impl Future<Output = Result<BTreeMap<String, u64>, AppError>> + Send;

    /// Names of the extensions installed on the portal.
    fn extensions(&self) -> impl Future<Output = Result<BTreeSet<String>, AppError>> + Send;
}

/// Factory for creating catalog clients.
///
/// Separate from [`CatalogClient`] so that construction stays synchronous.
pub trait CatalogClientFactory: Send + Sync {
    /// The type of client this factory creates.
    type Client: CatalogClient;

    /// Creates a client for the given portal.
    fn create(&self, portal: &Portal) -> Result<Self::Client, AppError>;
}

/// Downloads a resource and reads it as a table.
pub trait TableFetcher: Send + Sync + Clone + 'static {
    /// Fetches `url` and parses it according to `family`.
    ///
    /// Fails with `Connection`, `RemoteApi` or `Parse` errors.
    fn fetch_table(
        &self,
        url: &str,
        family: FormatFamily,
    ) -> impl Future<Output = Result<Table, AppError>> + Send;
}

/// Receives intermediate results after each completed batch.
pub trait CheckpointSink: Send + Sync {
    /// Persists `data` under `name` (e.g. `packages`), replacing any
    /// previous checkpoint of the same name.
    fn checkpoint(&self, name: &str, data: &Value) -> Result<(), AppError>;
}
