//! Connection annotation: enumerate, resolve, classify

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use geowatch_common::{ConnectionRecord, ConnectionState, GeoAttribution, HomeCountry};
use serde::Serialize;
use tracing::{debug, info};

use crate::geo::GeoResolver;
use crate::network::ConnectionEnumerator;

/// Counters for one monitoring cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub total: usize,
    pub established: usize,
    pub foreign: usize,
    pub domestic: usize,
    pub tiers: Vec<&'static str>,
    pub cached_entries: usize,
}

/// When to run monitoring cycles
#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    pub include_listening: bool,
    pub interval: Duration,
    /// Stop after the first cycle
    pub once: bool,
}

/// Owns the enumerator and resolver for the lifetime of the run
pub struct ConnectionAnnotator {
    enumerator: ConnectionEnumerator,
    resolver: GeoResolver,
}

impl ConnectionAnnotator {
    pub fn new(enumerator: ConnectionEnumerator, resolver: GeoResolver) -> Self {
        Self {
            enumerator,
            resolver,
        }
    }

    pub fn enumerator(&self) -> &ConnectionEnumerator {
        &self.enumerator
    }

    pub fn resolver(&self) -> &GeoResolver {
        &self.resolver
    }

    pub fn resolver_mut(&mut self) -> &mut GeoResolver {
        &mut self.resolver
    }

    /// Enumerate TCP and UDP connections and attribute every remote peer
    pub async fn annotate(&mut self, include_listening: bool) -> Vec<ConnectionRecord> {
        let records = self.enumerator.list_all(include_listening).await;
        self.annotate_records(records).await
    }

    /// Attribute already enumerated records, such as a saved listing
    pub async fn annotate_records(
        &mut self,
        mut records: Vec<ConnectionRecord>,
    ) -> Vec<ConnectionRecord> {
        for record in &mut records {
            let geo = match self.resolver.try_resolve(record.remote_address()).await {
                Ok(geo) => geo,
                Err(e) => {
                    debug!("Lookup of {} failed: {}", record.remote, e);
                    GeoAttribution::lookup_error()
                }
            };
            record.apply_attribution(geo);
        }

        // Cycles made only of cache hits still honour the flush interval
        self.resolver.maybe_flush();
        records
    }

    /// Summarize annotated records against the home country
    pub fn summarize(&self, records: &[ConnectionRecord], home: &HomeCountry) -> CycleSummary {
        let mut summary = count(records, home);
        summary.tiers = self.resolver.tier_names();
        summary.cached_entries = self.resolver.cache_len();
        summary
    }

    /// Run cycles on `schedule` until `shutdown` completes.
    ///
    /// `shutdown` is checked before every cycle, while a cycle runs and
    /// during the pause between cycles. A cycle cut short is not reported.
    /// Returns the number of completed cycles.
    pub async fn run_until<S, F>(
        &mut self,
        home: &HomeCountry,
        schedule: Schedule,
        mut shutdown: Pin<&mut S>,
        mut on_cycle: F,
    ) -> usize
    where
        S: Future<Output = ()>,
        F: FnMut(&[ConnectionRecord], &CycleSummary),
    {
        let mut cycles = 0;

        loop {
            let records = tokio::select! {
                biased;
                _ = shutdown.as_mut() => break,
                records = self.annotate(schedule.include_listening) => records,
            };
            let summary = self.summarize(&records, home);
            on_cycle(&records, &summary);
            cycles += 1;

            if schedule.once {
                return cycles;
            }

            tokio::select! {
                biased;
                _ = shutdown.as_mut() => break,
                _ = tokio::time::sleep(schedule.interval) => {}
            }
        }

        info!("Interrupted after {} cycles, shutting down", cycles);
        cycles
    }

    /// Flush the resolver's cache
    pub fn close(&mut self) {
        self.resolver.close();
    }
}

/// Foreign/domestic/established counters without resolver details
pub fn count(records: &[ConnectionRecord], home: &HomeCountry) -> CycleSummary {
    let total = records.len();
    let foreign = records
        .iter()
        .filter(|r| r.is_foreign(&home.country))
        .count();
    let established = records
        .iter()
        .filter(|r| r.state == ConnectionState::Established)
        .count();

    CycleSummary {
        total,
        established,
        foreign,
        domestic: total - foreign,
        ..Default::default()
    }
}
