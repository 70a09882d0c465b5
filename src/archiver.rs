use std::fs;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::archives::{Archive, ArchiveType};
use crate::archives_repo;
use crate::config::Config;
use crate::deleter;
use crate::messages_repo;
use crate::metrics;
use crate::orgs::Org;
use crate::orgs_repo;
use crate::planner;
use crate::report::{OrgPassMetrics, PassReport};
use crate::rollup;
use crate::runs_repo;
use crate::runtime::Runtime;
use crate::writer;

/// Wall-clock ceiling for one org, all types included
const ORG_DEADLINE: Duration = Duration::from_secs(12 * 60 * 60);
/// Ceiling for exporting and compressing one archive
const EXPORT_DEADLINE: Duration = Duration::from_secs(3 * 60 * 60);
/// Ceiling for building one month rollup from its dailies
const ROLLUP_DEADLINE: Duration = Duration::from_secs(60 * 60);
/// Ceiling for a full deletion pass on one archive
const DELETE_DEADLINE: Duration = Duration::from_secs(3 * 60 * 60);

/// What one pass did, logged at the end and fed to the metrics sink
#[derive(Debug, Default, Clone)]
pub struct PassSummary {
    pub orgs: usize,
    pub created: usize,
    pub failed: usize,
    pub rollups_created: usize,
    pub rollups_failed: usize,
    pub records_archived: i64,
    pub deleted: usize,
    pub delete_failed: usize,
}

/// Run one full pass: every active org in id order, every enabled record
/// type, build → rollup → delete. Failures are contained at the archive
/// granularity; an org blowing its deadline only loses its own remaining
/// work.
pub async fn run_pass(runtime: &Runtime, now: DateTime<Utc>) -> Result<PassSummary> {
    let started = Instant::now();
    let orgs = orgs_repo::active_orgs(&runtime.pool).await?;

    let mut summary = PassSummary {
        orgs: orgs.len(),
        ..Default::default()
    };
    let mut report = PassReport::new(now);

    for org in &orgs {
        let org_started = Instant::now();
        let before = summary.clone();

        match tokio::time::timeout(ORG_DEADLINE, archive_org(runtime, org, now, &mut summary))
            .await
        {
            Ok(()) => info!(
                org_id = org.id,
                elapsed_secs = org_started.elapsed().as_secs(),
                "finished org"
            ),
            Err(_) => error!(org_id = org.id, "org pass exceeded its deadline"),
        }

        report.add_org(OrgPassMetrics {
            org_id: org.id,
            org_name: org.name.clone(),
            created: summary.created - before.created,
            failed: summary.failed - before.failed,
            rollups_created: summary.rollups_created - before.rollups_created,
            rollups_failed: summary.rollups_failed - before.rollups_failed,
            records_archived: summary.records_archived - before.records_archived,
            deleted: summary.deleted - before.deleted,
            delete_failed: summary.delete_failed - before.delete_failed,
            duration_secs: org_started.elapsed().as_secs_f64(),
        });
    }

    report.total_duration_secs = started.elapsed().as_secs_f64();
    metrics::record_pass(&summary);
    info!("pass complete\n{}", report.render());
    Ok(summary)
}

fn enabled_types(config: &Config) -> Vec<ArchiveType> {
    let mut types = Vec::new();
    if config.archive_messages {
        types.push(ArchiveType::Message);
    }
    if config.archive_runs {
        types.push(ArchiveType::FlowRun);
    }
    types
}

/// Deletion only starts once every build for the org has been attempted;
/// build and delete are never interleaved within a pass.
async fn archive_org(runtime: &Runtime, org: &Org, now: DateTime<Utc>, summary: &mut PassSummary) {
    for archive_type in enabled_types(&runtime.config) {
        if let Err(e) = build_org_type(runtime, org, archive_type, now, summary).await {
            error!(
                org_id = org.id,
                archive_type = %archive_type,
                "build pass failed for type: {:#}",
                e
            );
        }
    }

    if runtime.config.delete {
        for archive_type in enabled_types(&runtime.config) {
            if let Err(e) = delete_org_type(runtime, org, archive_type, now, summary).await {
                error!(
                    org_id = org.id,
                    archive_type = %archive_type,
                    "deletion pass failed for type: {:#}",
                    e
                );
            }
        }
    }
}

/// One org, one record type: months straight from the database when the org
/// has never been archived, then the day tail, then month rollups over the
/// dailies that now exist.
async fn build_org_type(
    runtime: &Runtime,
    org: &Org,
    archive_type: ArchiveType,
    now: DateTime<Utc>,
    summary: &mut PassSummary,
) -> Result<()> {
    let retention_days = runtime.config.retention_days;

    // months that already failed as database builds this pass; re-offering
    // them to the rollup phase would just count the same month twice
    let mut failed_months = std::collections::HashSet::new();

    if archives_repo::archive_count(&runtime.pool, org.id, archive_type).await? == 0 {
        for month in planner::missing_month_archives(org, now, archive_type, &[], retention_days) {
            let start_date = month.start_date;
            if !build_one(runtime, org, month, summary).await {
                failed_months.insert(start_date);
            }
        }
    }

    let existing = archives_repo::existing_archives(&runtime.pool, org.id, archive_type).await?;
    for day in planner::missing_day_archives(org, now, archive_type, &existing, retention_days) {
        build_one(runtime, org, day, summary).await;
    }

    let existing = archives_repo::existing_archives(&runtime.pool, org.id, archive_type).await?;
    for month in planner::missing_month_archives(org, now, archive_type, &existing, retention_days)
    {
        if failed_months.contains(&month.start_date) {
            continue;
        }
        rollup_one(runtime, org, month, &existing, summary).await;
    }

    Ok(())
}

async fn build_one(
    runtime: &Runtime,
    org: &Org,
    archive: Archive,
    summary: &mut PassSummary,
) -> bool {
    let (archive_type, period, start_date) =
        (archive.archive_type, archive.period, archive.start_date);

    match build_archive_for(runtime, org, archive).await {
        Ok(built) => {
            summary.created += 1;
            summary.records_archived += built.record_count;
            true
        }
        Err(e) => {
            summary.failed += 1;
            error!(
                org_id = org.id,
                archive_type = %archive_type,
                period = %period,
                start_date = %start_date,
                "failed to build archive: {:#}",
                e
            );
            false
        }
    }
}

/// Build one archive from the database: export+compress on the blocking
/// pool, upload, record metadata, then drop the staged file. A failure after
/// upload leaves the blob behind; the next pass re-plans the interval and
/// the identical bytes overwrite the same hash-addressed key.
async fn build_archive_for(runtime: &Runtime, org: &Org, archive: Archive) -> Result<Archive> {
    let pool = runtime.pool.clone();
    let temp_dir = runtime.config.temp_dir.clone();
    let org_is_anon = org.is_anon;

    let export = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        let mut archive = archive;
        let descriptor = archive.clone();

        writer::build_archive(&mut archive, &temp_dir, |out| match descriptor.archive_type {
            ArchiveType::Message => {
                messages_repo::export(&mut conn, &descriptor, org_is_anon, out)
            }
            ArchiveType::FlowRun => runs_repo::export(&mut conn, &descriptor, out),
            ArchiveType::Session => bail!("session archives are not implemented"),
        })?;

        Ok::<Archive, anyhow::Error>(archive)
    });

    let mut archive = tokio::time::timeout(EXPORT_DEADLINE, export)
        .await
        .map_err(|_| anyhow::anyhow!("export deadline exceeded"))?
        .context("export task panicked")??;

    archive.url = runtime.store.put_archive(&archive).await?;
    archive.needs_deletion = true;

    let archive = archives_repo::create_archive(&runtime.pool, archive).await?;
    remove_staged_file(&archive);
    Ok(archive)
}

async fn rollup_one(
    runtime: &Runtime,
    org: &Org,
    mut month: Archive,
    existing: &[Archive],
    summary: &mut PassSummary,
) {
    let result: Result<Archive> = async move {
        tokio::time::timeout(
            ROLLUP_DEADLINE,
            rollup::build_rollup(runtime, org, &mut month, existing),
        )
        .await
        .map_err(|_| anyhow::anyhow!("rollup deadline exceeded"))??;

        month.url = runtime.store.put_archive(&month).await?;

        archives_repo::create_archive(&runtime.pool, month).await
    }
    .await;

    match result {
        Ok(recorded) => {
            summary.rollups_created += 1;
            summary.records_archived += recorded.record_count;
            remove_staged_file(&recorded);
        }
        Err(e) => {
            summary.rollups_failed += 1;
            error!(
                org_id = org.id,
                "failed to roll up month: {:#}",
                e
            );
        }
    }
}

async fn delete_org_type(
    runtime: &Runtime,
    org: &Org,
    archive_type: ArchiveType,
    now: DateTime<Utc>,
    summary: &mut PassSummary,
) -> Result<()> {
    let flagged =
        archives_repo::archives_needing_deletion(&runtime.pool, org.id, archive_type).await?;

    let mut any_deleted = false;
    for archive in flagged {
        let result = tokio::time::timeout(DELETE_DEADLINE, async {
            match archive_type {
                ArchiveType::Message => {
                    deleter::delete_archived_messages(runtime, &archive, now).await
                }
                ArchiveType::FlowRun => deleter::delete_archived_runs(runtime, &archive, now).await,
                ArchiveType::Session => bail!("session archives are not implemented"),
            }
        })
        .await
        .unwrap_or_else(|_| Err(anyhow::anyhow!("deletion deadline exceeded")));

        match result {
            Ok(rows) => {
                summary.deleted += 1;
                any_deleted = any_deleted || rows > 0;
            }
            Err(e) => {
                summary.delete_failed += 1;
                error!(
                    org_id = org.id,
                    archive_type = %archive_type,
                    start_date = %archive.start_date,
                    "failed to delete archived rows: {:#}",
                    e
                );
            }
        }
    }

    match archive_type {
        ArchiveType::Message => {
            deleter::cleanup_broadcasts(runtime, org, now).await?;
            if any_deleted {
                deleter::vacuum_table(&runtime.pool, "messages").await?;
            }
        }
        ArchiveType::FlowRun => {
            deleter::cleanup_flow_starts(runtime, org, now).await?;
            if any_deleted {
                deleter::vacuum_table(&runtime.pool, "flow_runs").await?;
            }
        }
        ArchiveType::Session => {}
    }

    Ok(())
}

fn remove_staged_file(archive: &Archive) {
    if !archive.archive_file.is_empty() {
        let _ = fs::remove_file(&archive.archive_file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(args: &[&str]) -> Config {
        use clap::Parser;
        let mut argv = vec!["coldstore"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_enabled_types_follow_flags() {
        let config = config_with(&[]);
        assert_eq!(
            enabled_types(&config),
            vec![ArchiveType::Message, ArchiveType::FlowRun]
        );

        let config = config_with(&["--archive-messages", "false"]);
        assert_eq!(enabled_types(&config), vec![ArchiveType::FlowRun]);

        let config = config_with(&["--archive-runs", "false"]);
        assert_eq!(enabled_types(&config), vec![ArchiveType::Message]);

        let config = config_with(&["--archive-messages", "false", "--archive-runs", "false"]);
        assert!(enabled_types(&config).is_empty());
    }
}
