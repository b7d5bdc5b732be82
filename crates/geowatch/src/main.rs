//! geowatch - network connections with geographic attribution
//!
//! Lists the host's TCP and UDP connections every few seconds, resolves
//! each remote peer to a location and flags peers outside the home country.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use geowatch::config::{print_help, Config};
use geowatch::export::ExportDocument;
use geowatch::geo::{
    GeoCache, GeoResolver, GeoTier, LocalDbTier, OnlineTier, RangeTable, RateLimiter,
};
use geowatch::http::{HttpClient, ReqwestClient};
use geowatch::network::{parse_listing, CommandRunner, ConnectionEnumerator, SystemCommandRunner};
use geowatch::report::{format_listing, format_summary};
use geowatch::{ConnectionAnnotator, CycleSummary, HomeCountryDetector, Schedule};
use geowatch_common::{ConnectionRecord, HomeCountry};

fn build_tiers(config: &Config, http: &Arc<dyn HttpClient>) -> Vec<Box<dyn GeoTier>> {
    let mut tiers: Vec<Box<dyn GeoTier>> = Vec::new();

    let city = config.city_db_path();
    let asn = config.asn_db_path();
    match LocalDbTier::open(city.as_deref(), asn.as_deref()) {
        Some(db) => tiers.push(Box::new(db)),
        None => tracing::info!("No GeoLite2 database available, skipping local-db tier"),
    }

    tiers.push(Box::new(RangeTable::builtin()));

    if config.online_lookups {
        let limiter = RateLimiter::new(config.min_request_spacing(), config.requests_per_minute);
        tiers.push(Box::new(OnlineTier::new(http.clone(), limiter)));
    }

    tiers
}

fn report_cycle(
    records: &[ConnectionRecord],
    summary: &CycleSummary,
    home: &HomeCountry,
    export: Option<&Path>,
) {
    println!("{}", format_listing(records, home));
    println!("{}", format_summary(summary, home));
    println!();

    if let Some(path) = export {
        if let Err(e) = ExportDocument::new(records, home, summary).write_to(path) {
            tracing::warn!("Export failed: {:#}", e);
        }
    }
}

fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    if config.help {
        print_help();
        return Ok(());
    }

    // Handle --gen-config (generate example and exit)
    if config.gen_config {
        println!("{}", Config::example_toml());
        return Ok(());
    }

    // Logs go to stderr so the listing on stdout stays clean
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("geowatch={}", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .context("Failed to initialize logging")?;

    for warning in &config.warnings {
        tracing::warn!("{}", warning);
    }

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start runtime")?
        .block_on(run(config))
}

async fn run(config: Config) -> Result<()> {
    tracing::info!("Starting geowatch");
    tracing::info!("Platform: {}", std::env::consts::OS);

    // Installed on first poll; every select below polls it before other work
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    tokio::pin!(shutdown);

    let saved = match &config.input {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read saved listing {:?}", path))?,
        ),
        None => None,
    };

    let http: Arc<dyn HttpClient> = Arc::new(
        ReqwestClient::new(config.lookup_timeout()).context("Failed to build HTTP client")?,
    );
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner::new(config.lookup_timeout()));

    let enumerator = tokio::select! {
        biased;
        _ = shutdown.as_mut() => return Ok(()),
        enumerator = ConnectionEnumerator::detect(runner) => enumerator,
    };
    tracing::info!(
        "Enumerating with {} tools ({:?})",
        enumerator.family(),
        enumerator.capabilities()
    );

    let cache = match &config.cache_path {
        Some(path) => GeoCache::load(path),
        None => {
            tracing::warn!("No cache directory available, attribution cache will not persist");
            GeoCache::in_memory()
        }
    };
    let resolver = GeoResolver::new(build_tiers(&config, &http), cache);
    let family = enumerator.family();
    let mut annotator = ConnectionAnnotator::new(enumerator, resolver);

    let mut detector = HomeCountryDetector::new(config.default_country.clone(), http)
        .with_override(config.home_country.clone())
        .with_online(config.online_lookups);
    let home = tokio::select! {
        biased;
        _ = shutdown.as_mut() => None,
        home = detector.detect(annotator.resolver_mut()) => Some(home),
    };
    let Some(home) = home else {
        tracing::info!("Interrupted, shutting down");
        annotator.close();
        return Ok(());
    };

    let export = config.export.as_deref();
    match saved {
        Some(listing) => {
            let records = parse_listing(family, &listing, config.include_listening);
            let records = tokio::select! {
                biased;
                _ = shutdown.as_mut() => None,
                records = annotator.annotate_records(records) => Some(records),
            };
            if let Some(records) = records {
                let summary = annotator.summarize(&records, &home);
                report_cycle(&records, &summary, &home, export);
            }
        }
        None => {
            let schedule = Schedule {
                include_listening: config.include_listening,
                interval: config.interval(),
                once: config.once,
            };
            annotator
                .run_until(&home, schedule, shutdown.as_mut(), |records, summary| {
                    report_cycle(records, summary, &home, export)
                })
                .await;
        }
    }

    annotator.close();
    Ok(())
}
