use std::net::SocketAddr;

use anyhow::{Context, Result};
use ::metrics::{counter, describe_counter};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use crate::archiver::PassSummary;

/// Install the Prometheus recorder, serving scrapes on `listen` when set.
/// With no listener configured the metrics macros stay no-ops.
pub fn init_metrics(listen: Option<SocketAddr>) -> Result<()> {
    let Some(addr) = listen else {
        info!("metrics listener disabled");
        return Ok(());
    };

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("failed to install Prometheus recorder")?;

    describe_counter!(
        "coldstore_archives_created_total",
        "Archives built and recorded"
    );
    describe_counter!("coldstore_archives_failed_total", "Archive builds that failed");
    describe_counter!(
        "coldstore_rollups_created_total",
        "Month rollups built and recorded"
    );
    describe_counter!("coldstore_rollups_failed_total", "Month rollups that failed");
    describe_counter!(
        "coldstore_records_archived_total",
        "Records written into archives"
    );
    describe_counter!(
        "coldstore_deletions_total",
        "Archives whose source rows were purged"
    );
    describe_counter!(
        "coldstore_deletions_failed_total",
        "Deletion passes that failed"
    );

    info!(%addr, "metrics listener started");
    Ok(())
}

/// Emit one pass's counters
pub fn record_pass(summary: &PassSummary) {
    counter!("coldstore_archives_created_total").increment(summary.created as u64);
    counter!("coldstore_archives_failed_total").increment(summary.failed as u64);
    counter!("coldstore_rollups_created_total").increment(summary.rollups_created as u64);
    counter!("coldstore_rollups_failed_total").increment(summary.rollups_failed as u64);
    counter!("coldstore_records_archived_total")
        .increment(summary.records_archived.max(0) as u64);
    counter!("coldstore_deletions_total").increment(summary.deleted as u64);
    counter!("coldstore_deletions_failed_total").increment(summary.delete_failed as u64);
}
