//! Harvest service: the staged pipeline over every configured portal.
//!
//! # Stages
//!
//! 1. **extensions / tags / themes**: one unit per portal.
//! 2. **counts**: one unit per portal; the counts are expanded into page
//!    requests by [`crate::pagination`]. A portal whose count fails gets no
//!    page request and a [`HarvestEvent::PortalWarning`].
//! 3. **packages**: one unit per page request. Every package is tagged with
//!    its origin portal and themes.
//! 4. **resources**: one unit per resource of every harvested package,
//!    profiled by [`crate::profiler::profile`].
//!
//! Each stage is one [`BoundedFetcher`] batch, so a stage only starts once
//! the previous one is over: resource profiling never sees an incomplete
//! package record.
//!
//! # Cancellation
//!
//! Every stage takes a `CancellationToken`. Once cancelled, no further unit
//! is dispatched, in-flight units finish, and whatever was collected is
//! still handed to the checkpoint sink.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{HarvestConfig, PortalRegistry};
use crate::fetcher::{BatchOutcome, BoundedFetcher};
use crate::models::{FacetKind, Package, PageRequest, Portal, Resource};
use crate::pagination::page_requests;
use crate::profiler::{profile, resource_requests, ResourceRequest};
use crate::progress::{HarvestEvent, ProgressReporter};
use crate::summary::{HarvestSummary, StageReport, StageStats};
use crate::traits::{CatalogClient, CatalogClientFactory, CheckpointSink, TableFetcher};
use crate::AppError;

/// One catalog client per portal, created once per run.
#[derive(Debug)]
pub struct ClientRegistry<C> {
    clients: HashMap<String, C>,
}

impl<C: CatalogClient> ClientRegistry<C> {
    /// Creates a client for every portal of the registry.
    ///
    /// # Errors
    ///
    /// Fails on the first portal the factory cannot build a client for.
    pub fn build<F>(portals: &PortalRegistry, factory: &F) -> Result<Self, AppError>
    where
        F: CatalogClientFactory<Client = C>,
    {
        let clients = portals
            .portals()
            .iter()
            .map(|p| Ok((p.id.clone(), factory.create(p)?)))
            .collect::<Result<HashMap<_, _>, AppError>>()?;
        Ok(Self { clients })
    }

    /// Returns the client of a registered portal.
    pub fn get(&self, portal_id: &str) -> Result<C, AppError> {
        self.clients.get(portal_id).cloned().ok_or_else(|| {
            AppError::ContractViolation(format!("no client registered for portal {}", portal_id))
        })
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

/// Data produced by a stage, with its statistics.
#[derive(Debug, Clone)]
pub struct StageOutput<T> {
    pub data: T,
    pub report: StageReport,
}

/// Page requests planned from the per-portal package counts.
#[derive(Debug, Clone)]
pub struct PagePlan {
    pub requests: Vec<PageRequest>,
    /// Portals that contributed no page because their count failed.
    pub skipped_portals: Vec<String>,
    pub report: StageReport,
}

/// Everything a full run produced.
#[derive(Debug, Clone, Default)]
pub struct HarvestResults {
    pub extensions: BTreeMap<String, BTreeSet<String>>,
    pub tags: BTreeMap<String, BTreeMap<String, u64>>,
    pub themes: BTreeMap<String, BTreeMap<String, u64>>,
    pub packages: Vec<Package>,
    pub resources: Vec<Resource>,
    pub summary: HarvestSummary,
}

/// Service for harvesting portal metadata.
///
/// Generic over the catalog client and the table fetcher so that the
/// pipeline can run against fakes in tests.
pub struct HarvestService<C, T>
where
    C: CatalogClient,
    T: TableFetcher,
{
    portals: PortalRegistry,
    clients: Arc<ClientRegistry<C>>,
    tables: T,
    config: Arc<HarvestConfig>,
    fetcher: BoundedFetcher,
    checkpoint: Option<Arc<dyn CheckpointSink>>,
}

impl<C, T> HarvestService<C, T>
where
    C: CatalogClient,
    T: TableFetcher,
{
    /// Creates the service and one client per portal.
    ///
    /// # Errors
    ///
    /// `AppError::InvalidConfig` for a zero worker count, or any error the
    /// factory returns while creating clients.
    pub fn new<F>(
        portals: PortalRegistry,
        factory: &F,
        tables: T,
        config: HarvestConfig,
    ) -> Result<Self, AppError>
    where
        F: CatalogClientFactory<Client = C>,
    {
        let fetcher = BoundedFetcher::new(config.worker_count())?;
        let clients = ClientRegistry::build(&portals, factory)?;
        info!(
            "Harvesting {} portals with {} workers",
            portals.len(),
            fetcher.workers()
        );
        Ok(Self {
            portals,
            clients: Arc::new(clients),
            tables,
            config: Arc::new(config),
            fetcher,
            checkpoint: None,
        })
    }

    /// Hands every completed batch to `sink`.
    pub fn with_checkpoint(mut self, sink: Arc<dyn CheckpointSink>) -> Self {
        self.checkpoint = Some(sink);
        self
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    fn save<S: Serialize>(&self, name: &str, data: &S, ran: bool) -> Result<(), AppError> {
        // Nothing ran: keep whatever an earlier run left behind.
        if !ran {
            return Ok(());
        }
        if let Some(sink) = &self.checkpoint {
            let value = serde_json::to_value(data)?;
            sink.checkpoint(name, &value)?;
        }
        Ok(())
    }

    async fn per_portal<R, F, Fut>(
        &self,
        batch: &str,
        op: F,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome<String, R>, AppError>
    where
        R: Send + 'static,
        F: Fn(Arc<Portal>, C) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = Result<R, AppError>> + Send + 'static,
    {
        let units = self
            .portals
            .portals()
            .iter()
            .map(|p| Ok((Arc::clone(p), self.clients.get(&p.id)?)))
            .collect::<Result<Vec<_>, AppError>>()?;

        self.fetcher
            .run(
                batch,
                units,
                |unit: &(Arc<Portal>, C)| unit.0.id.clone(),
                move |(portal, client)| op(portal, client),
                reporter,
                cancel,
            )
            .await
    }

    /// Extensions installed on every portal.
    pub async fn extensions(
        &self,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<StageOutput<BTreeMap<String, BTreeSet<String>>>, AppError> {
        let outcome = self
            .per_portal(
                "extensions",
                |_, client: C| async move { client.extensions().await },
                reporter,
                cancel,
            )
            .await?;

        self.finish_portal_stage("extensions", outcome)
    }

    /// Facet value counts for every portal.
    pub async fn facets(
        &self,
        kind: FacetKind,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<StageOutput<BTreeMap<String, BTreeMap<String, u64>>>, AppError> {
        let outcome = self
            .per_portal(
                kind.name(),
                move |portal: Arc<Portal>, client: C| async move {
                    client.facet_counts(kind.field_for(&portal)).await
                },
                reporter,
                cancel,
            )
            .await?;

        self.finish_portal_stage(kind.name(), outcome)
    }

    fn finish_portal_stage<R: Serialize>(
        &self,
        name: &str,
        outcome: BatchOutcome<String, R>,
    ) -> Result<StageOutput<BTreeMap<String, R>>, AppError> {
        let stats = StageStats::from(&outcome);
        let cancelled = outcome.cancelled;
        let data: BTreeMap<String, R> = outcome.results.into_iter().collect();

        self.save(name, &data, stats.completed() > 0 || !cancelled)?;

        Ok(StageOutput {
            report: StageReport::new(name, stats, data.len(), cancelled),
            data,
        })
    }

    /// Counts packages on every portal and plans the page requests.
    pub async fn plan_pages(
        &self,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<PagePlan, AppError> {
        let outcome = self
            .per_portal(
                "counts",
                |_, client: C| async move { client.count_packages().await },
                reporter,
                cancel,
            )
            .await?;

        let namespace: Arc<str> = Arc::from(self.config.namespace.as_str());
        let mut requests = Vec::new();
        let mut skipped_portals = Vec::new();

        for portal in self.portals.portals() {
            match outcome.results.get(&portal.id) {
                Some(&count) => {
                    requests.extend(page_requests(
                        portal,
                        &namespace,
                        count,
                        self.config.page_size,
                        self.config.limit,
                    ));
                }
                None => {
                    if let Some(e) = outcome.failures.get(&portal.id) {
                        reporter.report(HarvestEvent::PortalWarning {
                            portal: portal.id.clone(),
                            message: format!("no package count, skipping portal: {}", e),
                        });
                    }
                    skipped_portals.push(portal.id.clone());
                }
            }
        }

        info!(
            "Planned {} page requests over {} portals",
            requests.len(),
            outcome.results.len()
        );

        let stats = StageStats::from(&outcome);
        Ok(PagePlan {
            report: StageReport::new("counts", stats, requests.len(), outcome.cancelled),
            requests,
            skipped_portals,
        })
    }

    /// Fetches every planned page and tags packages with their origin.
    ///
    /// Packages come back ordered by portal and page offset.
    pub async fn packages(
        &self,
        requests: Vec<PageRequest>,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<StageOutput<Vec<Package>>, AppError> {
        let clients = Arc::clone(&self.clients);

        let outcome = self
            .fetcher
            .run(
                "packages",
                requests,
                PageRequest::key,
                move |request: PageRequest| {
                    let clients = Arc::clone(&clients);
                    async move {
                        let client = clients.get(&request.portal.id)?;
                        let mut packages = client
                            .search_packages(request.offset, request.page_size)
                            .await?;
                        for package in packages.iter_mut() {
                            package.tag_origin(&request.portal, &request.namespace);
                        }
                        Ok(packages)
                    }
                },
                reporter,
                cancel,
            )
            .await?;

        let stats = StageStats::from(&outcome);
        let cancelled = outcome.cancelled;
        let data: Vec<Package> = outcome
            .results
            .into_iter()
            .collect::<BTreeMap<_, _>>()
            .into_values()
            .flatten()
            .collect();

        self.save("packages", &data, stats.completed() > 0 || !cancelled)?;

        Ok(StageOutput {
            report: StageReport::new("packages", stats, data.len(), cancelled),
            data,
        })
    }

    /// Profiles every resource of `packages`.
    ///
    /// # Errors
    ///
    /// `AppError::ContractViolation` when a package did not come out of the
    /// package stage (no origin portal).
    pub async fn resources(
        &self,
        packages: Vec<Package>,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<StageOutput<Vec<Resource>>, AppError> {
        let namespace = self.config.namespace.clone();
        let requests = resource_requests(packages, &namespace)?;
        let tables = self.tables.clone();
        let config = Arc::clone(&self.config);

        let outcome = self
            .fetcher
            .run(
                "resources",
                requests,
                |request: &ResourceRequest| request.key(&namespace),
                move |request: ResourceRequest| {
                    let tables = tables.clone();
                    let config = Arc::clone(&config);
                    async move {
                        profile(
                            &tables,
                            &request.package,
                            request.resource,
                            &config.namespace,
                            &config.data_formats,
                        )
                        .await
                    }
                },
                reporter,
                cancel,
            )
            .await?;

        let stats = StageStats::from(&outcome);
        let cancelled = outcome.cancelled;
        let data: Vec<Resource> = outcome
            .results
            .into_iter()
            .collect::<BTreeMap<_, _>>()
            .into_values()
            .collect();

        self.save("resources", &data, stats.completed() > 0 || !cancelled)?;

        Ok(StageOutput {
            report: StageReport::new("resources", stats, data.len(), cancelled),
            data,
        })
    }

    /// Runs every stage in order, stopping after a cancelled stage.
    pub async fn run_all(
        &self,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<HarvestResults, AppError> {
        let mut results = HarvestResults::default();

        let extensions = self.extensions(reporter, cancel).await?;
        results.extensions = extensions.data;
        results.summary.add(extensions.report);
        if cancel.is_cancelled() {
            return Ok(results);
        }

        let tags = self.facets(FacetKind::Tags, reporter, cancel).await?;
        results.tags = tags.data;
        results.summary.add(tags.report);
        if cancel.is_cancelled() {
            return Ok(results);
        }

        let themes = self.facets(FacetKind::Themes, reporter, cancel).await?;
        results.themes = themes.data;
        results.summary.add(themes.report);
        if cancel.is_cancelled() {
            return Ok(results);
        }

        let plan = self.plan_pages(reporter, cancel).await?;
        results.summary.add(plan.report);
        if cancel.is_cancelled() {
            return Ok(results);
        }

        let packages = self.packages(plan.requests, reporter, cancel).await?;
        results.summary.add(packages.report);
        results.packages = packages.data;
        if cancel.is_cancelled() {
            return Ok(results);
        }

        let resources = self
            .resources(results.packages.clone(), reporter, cancel)
            .await?;
        results.summary.add(resources.report);
        results.resources = resources.data;

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DataFormats, FormatFamily};
    use crate::progress::testing::RecordingReporter;
    use crate::progress::SilentReporter;
    use crate::table::{Column, Table};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Clone)]
    struct FakeCatalog {
        portal_id: String,
        total: Option<u64>,
        failing_offset: Option<u64>,
        resources_per_package: usize,
    }

    impl FakeCatalog {
        fn new(portal_id: &str, total: Option<u64>) -> Self {
            Self {
                portal_id: portal_id.to_string(),
                total,
                failing_offset: None,
                resources_per_package: 1,
            }
        }
    }

    impl CatalogClient for FakeCatalog {
        async fn count_packages(&self) -> Result<u64, AppError> {
            self.total
                .ok_or_else(|| AppError::Connection("connection refused".to_string()))
        }

        async fn search_packages(&self, offset: u64, page_size: u64) -> Result<Vec<Package>, AppError> {
            if self.failing_offset == Some(offset) {
                return Err(AppError::RemoteApi("HTTP 500".to_string()));
            }
            let total = self.total.unwrap_or(0);
            Ok((offset..(offset + page_size).min(total))
                .map(|i| {
                    serde_json::from_value(json!({
                        "id": format!("{}-{}", self.portal_id, i),
                        "isopen": true,
                        "theme-primary": "science",
                        "tags": [{"display_name": "t"}],
                        "resources": (0..self.resources_per_package)
                            .map(|r| json!({"id": format!("r{r}"), "format": "csv", "url": format!("https://example.org/{i}/{r}.csv")}))
                            .collect::<Vec<_>>(),
                    }))
                    .unwrap()
                })
                .collect())
        }

        async fn facet_counts(&self, facet_field: &str) -> Result<BTreeMap<String, u64>, AppError> {
            if self.total.is_none() {
                return Err(AppError::Connection("connection refused".to_string()));
            }
            Ok(BTreeMap::from([(format!("{facet_field}-value"), 3)]))
        }

        async fn extensions(&self) -> Result<BTreeSet<String>, AppError> {
            if self.total.is_none() {
                return Err(AppError::Connection("connection refused".to_string()));
            }
            Ok(BTreeSet::from(["datastore".to_string(), self.portal_id.clone()]))
        }
    }

    struct FakeFactory {
        catalogs: HashMap<String, FakeCatalog>,
    }

    impl CatalogClientFactory for FakeFactory {
        type Client = FakeCatalog;

        fn create(&self, portal: &Portal) -> Result<FakeCatalog, AppError> {
            self.catalogs
                .get(&portal.id)
                .cloned()
                .ok_or_else(|| AppError::InvalidPortalUrl(portal.base_url.clone()))
        }
    }

    #[derive(Clone)]
    struct FakeTables;

    impl TableFetcher for FakeTables {
        async fn fetch_table(&self, url: &str, _family: FormatFamily) -> Result<Table, AppError> {
            if url.contains("/3/") {
                return Err(AppError::Connection("connection reset by peer".to_string()));
            }
            Ok(Table::from_columns(vec![Column::new(
                "date",
                vec!["2020-01-01".into(), "2021-06-30".into()],
            )]))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        saved: Mutex<Vec<(String, Value)>>,
    }

    impl RecordingSink {
        fn names(&self) -> Vec<String> {
            self.saved.lock().unwrap().iter().map(|(n, _)| n.clone()).collect()
        }
    }

    impl CheckpointSink for RecordingSink {
        fn checkpoint(&self, name: &str, data: &Value) -> Result<(), AppError> {
            self.saved.lock().unwrap().push((name.to_string(), data.clone()));
            Ok(())
        }
    }

    /// Cancels the run on its first download.
    #[derive(Clone)]
    struct CancellingTables {
        cancel: CancellationToken,
        calls: Arc<AtomicUsize>,
    }

    impl TableFetcher for CancellingTables {
        async fn fetch_table(&self, _url: &str, _family: FormatFamily) -> Result<Table, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.cancel.cancel();
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(Table::from_columns(vec![Column::new(
                "year",
                vec!["1999-03-01".into(), "2004-07-15".into()],
            )]))
        }
    }

    fn service(catalogs: Vec<FakeCatalog>, page_size: u64, limit: u64) -> HarvestService<FakeCatalog, FakeTables> {
        service_with(catalogs, page_size, limit, FakeTables, 4)
    }

    fn service_with<T: TableFetcher>(
        catalogs: Vec<FakeCatalog>,
        page_size: u64,
        limit: u64,
        tables: T,
        workers: usize,
    ) -> HarvestService<FakeCatalog, T> {
        let portals = PortalRegistry::new(
            catalogs
                .iter()
                .map(|c| Portal::new(&c.portal_id, "https://example.org/", "theme-primary")),
        );
        let factory = FakeFactory {
            catalogs: catalogs.into_iter().map(|c| (c.portal_id.clone(), c)).collect(),
        };
        let config = HarvestConfig {
            namespace: "dpe".to_string(),
            workers: Some(workers),
            page_size,
            limit,
            data_formats: DataFormats::new(["csv"], ["xlsx"]),
        };
        HarvestService::new(portals, &factory, tables, config).unwrap()
    }

    fn harvested_package(id: &str, urls: &[&str]) -> Package {
        let mut package: Package = serde_json::from_value(json!({
            "id": id,
            "isopen": true,
            "resources": urls
                .iter()
                .map(|url| json!({"id": "r0", "format": "csv", "url": url}))
                .collect::<Vec<_>>(),
        }))
        .unwrap();
        package.tag_origin(&Portal::new("kdl", "https://example.org/", "theme-primary"), "dpe");
        package
    }

    #[test]
    fn test_zero_workers_rejected() {
        let portals = PortalRegistry::new(vec![]);
        let factory = FakeFactory {
            catalogs: HashMap::new(),
        };
        let config = HarvestConfig {
            workers: Some(0),
            ..Default::default()
        };
        let result = HarvestService::new(portals, &factory, FakeTables, config);
        assert!(matches!(result, Err(AppError::InvalidConfig(_))));
    }

    #[test]
    fn test_client_registry_missing_portal() {
        let portals = PortalRegistry::new(vec![Portal::new("a", "https://a.example.org/", "t")]);
        let factory = FakeFactory {
            catalogs: HashMap::new(),
        };
        assert!(ClientRegistry::build(&portals, &factory).is_err());
    }

    #[tokio::test]
    async fn test_extensions_isolate_failing_portal() {
        let svc = service(
            vec![FakeCatalog::new("up", Some(1)), FakeCatalog::new("down", None)],
            100,
            0,
        );

        let out = svc
            .extensions(&SilentReporter, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(out.data.len(), 1);
        assert!(out.data["up"].contains("datastore"));
        assert_eq!(out.report.stats.failed, 1);
    }

    #[tokio::test]
    async fn test_facets_use_portal_theme_field() {
        let svc = service(vec![FakeCatalog::new("up", Some(1))], 100, 0);
        let cancel = CancellationToken::new();

        let themes = svc.facets(FacetKind::Themes, &SilentReporter, &cancel).await.unwrap();
        assert_eq!(themes.data["up"]["theme-primary-value"], 3);

        let tags = svc.facets(FacetKind::Tags, &SilentReporter, &cancel).await.unwrap();
        assert_eq!(tags.data["up"]["tags-value"], 3);
    }

    #[tokio::test]
    async fn test_plan_pages_skips_portal_without_count() {
        let svc = service(
            vec![
                FakeCatalog::new("big", Some(250)),
                FakeCatalog::new("empty", Some(0)),
                FakeCatalog::new("down", None),
            ],
            100,
            0,
        );
        let reporter = RecordingReporter::default();

        let plan = svc
            .plan_pages(&reporter, &CancellationToken::new())
            .await
            .unwrap();

        let big: Vec<u64> = plan
            .requests
            .iter()
            .filter(|r| r.portal.id == "big")
            .map(|r| r.offset)
            .collect();
        assert_eq!(big, vec![0, 100, 200]);
        assert_eq!(plan.requests.iter().filter(|r| r.portal.id == "empty").count(), 1);
        assert_eq!(plan.skipped_portals, vec!["down".to_string()]);

        let warned = reporter
            .events()
            .into_iter()
            .any(|e| matches!(e, HarvestEvent::PortalWarning { portal, .. } if portal == "down"));
        assert!(warned);
    }

    #[tokio::test]
    async fn test_plan_pages_respects_limit() {
        let svc = service(vec![FakeCatalog::new("big", Some(1000))], 100, 150);
        let plan = svc
            .plan_pages(&SilentReporter, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(plan.requests.len(), 2);
    }

    #[tokio::test]
    async fn test_packages_are_tagged_and_ordered() {
        let mut flaky = FakeCatalog::new("flaky", Some(30));
        flaky.failing_offset = Some(10);
        let svc = service(vec![FakeCatalog::new("ok", Some(25)), flaky], 10, 0);
        let cancel = CancellationToken::new();

        let plan = svc.plan_pages(&SilentReporter, &cancel).await.unwrap();
        let out = svc.packages(plan.requests, &SilentReporter, &cancel).await.unwrap();

        assert_eq!(out.report.stats.failed, 1);
        assert_eq!(out.data.len(), 25 + 20);
        assert!(out.data.iter().all(|p| p.portal_id("dpe").is_some()));
        assert!(out.data.iter().all(|p| p.themes("dpe") == json!("science")));

        let flaky_ids: Vec<&str> = out
            .data
            .iter()
            .filter(|p| p.portal_id("dpe") == Some("flaky"))
            .map(|p| p.id.as_str())
            .collect();
        assert_eq!(flaky_ids.first(), Some(&"flaky-0"));
        assert!(!flaky_ids.contains(&"flaky-10"));
        assert_eq!(flaky_ids.last(), Some(&"flaky-29"));
    }

    #[tokio::test]
    async fn test_run_all_with_checkpoints() {
        let mut catalog = FakeCatalog::new("kdl", Some(5));
        catalog.resources_per_package = 2;
        let sink = Arc::new(RecordingSink::default());
        let svc = service(vec![catalog], 2, 0).with_checkpoint(sink.clone());

        let results = svc
            .run_all(&SilentReporter, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(results.packages.len(), 5);
        assert_eq!(results.resources.len(), 10);
        assert_eq!(
            sink.names(),
            vec!["extensions", "tags", "themes", "packages", "resources"]
        );

        let failed: Vec<&Resource> = results
            .resources
            .iter()
            .filter(|r| r.error_message.is_some())
            .collect();
        assert_eq!(failed.len(), 2);
        assert!(failed.iter().all(|r| r.headers.is_none()));

        let profiled = results
            .resources
            .iter()
            .find(|r| r.error_message.is_none())
            .unwrap();
        assert_eq!(profiled.headers.as_deref(), Some("date"));
        assert_eq!(profiled.min_date.as_deref(), Some("2020-01-01"));
        assert_eq!(profiled.max_date.as_deref(), Some("2021-06-30"));
        assert_eq!(profiled.extras["dpe:portal"], "kdl");

        assert_eq!(results.summary.failed_units(), 0);
        assert!(!results.summary.was_cancelled());
    }

    #[tokio::test]
    async fn test_resources_reject_untagged_packages() {
        let svc = service(vec![FakeCatalog::new("kdl", Some(1))], 10, 0);
        let result = svc
            .resources(vec![Package::default()], &SilentReporter, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(AppError::ContractViolation(_))));
    }

    #[tokio::test]
    async fn test_cancelled_run_writes_nothing_new() {
        let sink = Arc::new(RecordingSink::default());
        let svc = service(vec![FakeCatalog::new("kdl", Some(5))], 2, 0).with_checkpoint(sink.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let results = svc.run_all(&SilentReporter, &cancel).await.unwrap();

        assert!(results.summary.was_cancelled());
        assert_eq!(results.summary.stages.len(), 1);
        assert!(sink.names().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_package_keeps_every_resource() {
        let svc = service(vec![FakeCatalog::new("kdl", Some(1))], 10, 0);
        let packages = vec![
            harvested_package("same", &["https://example.org/a.csv"]),
            harvested_package("same", &["https://example.org/b.csv"]),
        ];

        let out = svc
            .resources(packages, &SilentReporter, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(out.data.len(), 2);
        assert_eq!(out.report.stats.succeeded, 2);
        assert_eq!(out.report.stats.skipped, 0);
        assert!(!out.report.cancelled);

        let urls: Vec<&str> = out.data.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["https://example.org/a.csv", "https://example.org/b.csv"]);
    }

    #[tokio::test]
    async fn test_cancel_mid_resources_saves_partial_results() {
        let cancel = CancellationToken::new();
        let tables = CancellingTables {
            cancel: cancel.clone(),
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let sink = Arc::new(RecordingSink::default());
        let svc = service_with(vec![FakeCatalog::new("kdl", Some(1))], 10, 0, tables.clone(), 1)
            .with_checkpoint(sink.clone());
        let packages = (0..4)
            .map(|i| {
                let url = format!("https://example.org/{i}.csv");
                harvested_package(&format!("p{i}"), &[url.as_str()])
            })
            .collect();

        let out = svc.resources(packages, &SilentReporter, &cancel).await.unwrap();

        assert!(out.report.cancelled);
        assert_eq!(tables.calls.load(Ordering::SeqCst), 1);
        assert_eq!(out.data.len(), 1);
        assert_eq!(out.data[0].min_date.as_deref(), Some("1999-03-01"));
        assert_eq!(out.report.stats.succeeded, 1);
        assert_eq!(out.report.stats.skipped, 3);

        let saved = sink.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].0, "resources");
        assert_eq!(saved[0].1.as_array().map(Vec::len), Some(1));
        assert_eq!(saved[0].1[0]["url"], "https://example.org/0.csv");
    }
}
