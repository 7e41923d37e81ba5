//! Resource profiling: package-level context plus, for open tabular
//! resources, the column headers and the temporal extent of the payload.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::dates::infer_date_range;
use crate::error::{AppError, ErrorKind};
use crate::models::{namespaced, DataFormats, FormatFamily, Package, Resource};
use crate::traits::TableFetcher;

/// One resource to profile, together with the package that owns it.
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    pub package: Arc<Package>,
    pub resource: Resource,
    /// Position of the owning package in the submitted package list.
    pub package_seq: usize,
    /// Position of the resource in its package.
    pub index: usize,
}

/// Identity of a [`ResourceRequest`] inside a batch.
///
/// Package ids are not unique across a batch (offset paging can return the
/// same record twice), so the package's position takes part in the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub portal_id: String,
    pub package_id: String,
    pub package_seq: usize,
    pub index: usize,
    pub resource_id: String,
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.portal_id, self.package_id, self.resource_id
        )
    }
}

impl ResourceRequest {
    pub fn key(&self, namespace: &str) -> ResourceKey {
        ResourceKey {
            portal_id: self.package.portal_id(namespace).unwrap_or_default().to_string(),
            package_id: self.package.id.clone(),
            package_seq: self.package_seq,
            index: self.index,
            resource_id: self.resource.id.clone(),
        }
    }
}

/// Splits packages into resource requests.
///
/// Requests are interleaved round-robin across portals so that a batch of
/// downloads is spread over every portal instead of hammering one at a time.
///
/// # Errors
///
/// `AppError::ContractViolation` when a package carries no origin portal,
/// i.e. did not come out of the package stage.
pub fn resource_requests(
    packages: Vec<Package>,
    namespace: &str,
) -> Result<Vec<ResourceRequest>, AppError> {
    let mut by_portal: BTreeMap<String, VecDeque<ResourceRequest>> = BTreeMap::new();

    for (package_seq, mut package) in packages.into_iter().enumerate() {
        let portal_id = package
            .portal_id(namespace)
            .ok_or_else(|| missing_origin(&package, namespace))?
            .to_string();

        let resources = std::mem::take(&mut package.resources);
        let package = Arc::new(package);
        let queue = by_portal.entry(portal_id).or_default();
        for (index, resource) in resources.into_iter().enumerate() {
            queue.push_back(ResourceRequest {
                package: Arc::clone(&package),
                resource,
                package_seq,
                index,
            });
        }
    }

    let mut queues: Vec<VecDeque<ResourceRequest>> = by_portal.into_values().collect();
    let mut requests = Vec::with_capacity(queues.iter().map(VecDeque::len).sum());
    while !queues.is_empty() {
        for queue in queues.iter_mut() {
            if let Some(request) = queue.pop_front() {
                requests.push(request);
            }
        }
        queues.retain(|q| !q.is_empty());
    }

    Ok(requests)
}

fn missing_origin(package: &Package, namespace: &str) -> AppError {
    AppError::ContractViolation(format!(
        "package {:?} has no {} field",
        package.id,
        namespaced(namespace, "portal")
    ))
}

/// Copies package-level context onto the resource.
///
/// # Errors
///
/// `AppError::ContractViolation` when the package carries no origin portal.
pub fn annotate(package: &Package, resource: &mut Resource, namespace: &str) -> Result<(), AppError> {
    let portal_id = package
        .portal_id(namespace)
        .ok_or_else(|| missing_origin(package, namespace))?;

    resource.organisation = Some(package.organisation());
    resource.tags = Some(package.tags_summary());
    resource.extras.insert(
        namespaced(namespace, "portal"),
        Value::String(portal_id.to_string()),
    );
    resource
        .extras
        .insert(namespaced(namespace, "themes"), package.themes(namespace));
    Ok(())
}

/// Decides whether the resource payload should be downloaded, and as what.
///
/// The package must be open, the declared format must be parsable and the
/// URL must not point to a zip archive.
pub fn eligibility(package: &Package, resource: &Resource, formats: &DataFormats) -> Option<FormatFamily> {
    if !package.is_open() {
        return None;
    }
    if resource.url.trim().to_ascii_lowercase().ends_with(".zip") {
        return None;
    }
    formats.family_of(&resource.format)
}

/// Profiles one resource of `package`.
///
/// Always returns the resource with `organisation`, `tags` and the
/// namespaced `portal`/`themes` fields set. Eligible resources additionally
/// get `headers`, `min_date` and `max_date`, or `error_message` and
/// `error_url` when the payload could not be fetched or read.
///
/// # Errors
///
/// Only contract violations are returned; every fetch or parse failure is
/// recorded on the resource.
pub async fn profile<T: TableFetcher>(
    tables: &T,
    package: &Package,
    mut resource: Resource,
    namespace: &str,
    formats: &DataFormats,
) -> Result<Resource, AppError> {
    annotate(package, &mut resource, namespace)?;

    let Some(family) = eligibility(package, &resource, formats) else {
        return Ok(resource);
    };

    debug!("Profiling {} as {:?}", resource.url, family);

    match read_profile(tables, &resource.url, family).await {
        Ok((headers, range)) => {
            resource.headers = Some(headers);
            resource.min_date = Some(range.min_label());
            resource.max_date = Some(range.max_label());
        }
        Err(e) if e.kind() == ErrorKind::ContractViolation => return Err(e),
        Err(e) => {
            debug!("Recording failure for {}: {}", resource.url, e);
            resource.error_message = Some(e.to_string());
            resource.error_url = Some(resource.url.clone());
        }
    }

    Ok(resource)
}

async fn read_profile<T: TableFetcher>(
    tables: &T,
    url: &str,
    family: FormatFamily,
) -> Result<(String, crate::dates::DateRange), AppError> {
    let table = tables.fetch_table(url, family).await?;
    tokio::task::spawn_blocking(move || (table.headers(), infer_date_range(&table)))
        .await
        .map_err(|e| AppError::Generic(format!("date inference task failed: {}", e)))
}
