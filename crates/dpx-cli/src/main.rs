use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use dotenvy::dotenv;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::FmtSubscriber;

use dpx_cli::{BarReporter, Command, Config, FileSink};
use dpx_client::{CkanClientFactory, HttpTableFetcher};
use dpx_core::{
    default_config_path, load_explorer_config, FacetKind, HarvestService, HarvestSummary,
    HttpConfig, Package, PortalRegistry, ProgressReporter, TracingReporter,
};

type Service = HarvestService<dpx_client::CkanClient, HttpTableFetcher>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    // Parse command line arguments
    let config = Config::parse();

    // Setup logging (stderr, progress bars share it)
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    info!("Data Portal Explorer");

    let explorer = match load_explorer_config(config.config.as_deref()) {
        Ok(Some(explorer)) => explorer,
        Ok(None) => {
            let hint = default_config_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "portals.toml".to_string());
            bail!("No configuration found. Create {} or pass --config", hint);
        }
        Err(e) => return Err(anyhow!(e.user_message())),
    };

    let portals = PortalRegistry::from_config(&explorer);
    if portals.is_empty() {
        bail!("No enabled portals in the configuration");
    }

    let (rows, limit) = match &config.command {
        Command::Packages { rows, limit } | Command::All { rows, limit } => (*rows, *limit),
        _ => (dpx_core::config::DEFAULT_PAGE_SIZE, 0),
    };
    let mut harvest = explorer.harvest_config(rows, limit);
    if config.workers.is_some() {
        harvest.workers = config.workers;
    }

    let sink = FileSink::new(&config.dest, config.format)
        .with_context(|| format!("Cannot create {}", config.dest.display()))?;

    let http = HttpConfig::default();
    let factory = CkanClientFactory::new(http.clone());
    let tables = HttpTableFetcher::new(http)?;
    let service = HarvestService::new(portals, &factory, tables, harvest)
        .map_err(|e| anyhow!(e.user_message()))?
        .with_checkpoint(Arc::new(sink));

    // Ctrl-C: finish in-flight units, start no new ones, keep partial results
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight requests");
            token.cancel();
        }
    });

    let reporter: Box<dyn ProgressReporter> = if std::io::stderr().is_terminal() {
        Box::new(BarReporter::new())
    } else {
        Box::new(TracingReporter)
    };

    let summary = run(&service, config.command, reporter.as_ref(), &cancel).await?;
    log_summary(&summary, &config.dest);

    Ok(())
}

async fn run(
    service: &Service,
    command: Command,
    reporter: &dyn ProgressReporter,
    cancel: &CancellationToken,
) -> anyhow::Result<HarvestSummary> {
    let mut summary = HarvestSummary::new();

    match command {
        Command::Extensions => {
            let output = service.extensions(reporter, cancel).await?;
            summary.add(output.report);
        }
        Command::Tags => {
            let output = service.facets(FacetKind::Tags, reporter, cancel).await?;
            summary.add(output.report);
        }
        Command::Themes => {
            let output = service.facets(FacetKind::Themes, reporter, cancel).await?;
            summary.add(output.report);
        }
        Command::Packages { .. } => {
            info!(" . preparing package requests");
            let plan = service.plan_pages(reporter, cancel).await?;
            summary.add(plan.report);
            if plan.requests.is_empty() {
                bail!("Failed to get package requests");
            }
            let output = service.packages(plan.requests, reporter, cancel).await?;
            summary.add(output.report);
        }
        Command::Resources { packages_json } => {
            let packages = read_packages(&packages_json)?;
            info!(" . preparing resource requests for {} packages", packages.len());
            let output = service.resources(packages, reporter, cancel).await?;
            summary.add(output.report);
        }
        Command::All { .. } => {
            summary = service.run_all(reporter, cancel).await?.summary;
        }
    }

    Ok(summary)
}

fn read_packages(path: &Path) -> anyhow::Result<Vec<Package>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("{} is not a packages dump", path.display()))
}

fn log_summary(summary: &HarvestSummary, dest: &Path) {
    for stage in &summary.stages {
        let line = format!(
            "{}: {} records ({} ok, {} failed, {} skipped)",
            stage.name,
            stage.records,
            stage.stats.succeeded,
            stage.stats.failed,
            stage.stats.skipped
        );
        if stage.is_clean() {
            info!("{}", line);
        } else {
            warn!("{}", line);
        }
    }
    if summary.was_cancelled() {
        warn!("Harvest interrupted; partial results written to {}", dest.display());
    } else {
        info!(
            "Harvest complete: {} failed units, results in {}",
            summary.failed_units(),
            dest.display()
        );
    }
}
