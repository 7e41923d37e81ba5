//! dpx Client - HTTP collaborators for the harvesting pipeline
//!
//! This crate provides:
//!
//! - [`ckan`] - CKAN action API client implementing [`dpx_core::CatalogClient`]
//! - [`download`] - resource downloader implementing [`dpx_core::TableFetcher`]
//! - [`tabular`] - CSV and spreadsheet payload parsing into [`dpx_core::Table`]

pub mod ckan;
pub mod download;
pub mod tabular;

pub use ckan::{CkanClient, CkanClientFactory};
pub use download::HttpTableFetcher;
