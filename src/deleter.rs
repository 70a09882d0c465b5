use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{info, warn};

use crate::archives::Archive;
use crate::archives_repo;
use crate::messages;
use crate::messages_repo;
use crate::orgs::Org;
use crate::runs;
use crate::runs_repo;
use crate::runtime::{PgPool, Runtime};

/// Rows deleted per transaction
const DELETE_BATCH_SIZE: usize = 100;
/// Client-side ceiling for one delete transaction; the transaction also
/// carries a matching server-side statement timeout
const DELETE_BATCH_DEADLINE: Duration = Duration::from_secs(15 * 60);
/// Wall-clock budget for one ancillary cleanup pass
const CLEANUP_DEADLINE: Duration = Duration::from_secs(60 * 60);

/// Delete the source messages behind a verified archive.
///
/// The blob is integrity-checked first, the interval is enumerated, and the
/// live (non-deleted-visibility) count is sanity-checked against the archive
/// before anything is removed. Rows then go in fixed-size batches, label
/// associations first, each batch one transaction. Finally the archive row
/// is flipped to deletion-complete.
pub async fn delete_archived_messages(
    runtime: &Runtime,
    archive: &Archive,
    now: DateTime<Utc>,
) -> Result<usize> {
    let archive_id = archive.id.context("archive has no id")?;

    runtime
        .store
        .validate_archive(archive, runtime.config.check_s3_hashes)
        .await?;

    let rows = messages_repo::interval_rows(&runtime.pool, archive).await?;
    let live = rows
        .iter()
        .filter(|(_, visibility)| !messages::is_deleted_visibility(visibility))
        .count() as i64;
    if live > archive.record_count {
        bail!(
            "interval holds {} live messages but archive {} recorded {}",
            live,
            archive_id,
            archive.record_count
        );
    }

    let ids: Vec<i64> = rows.into_iter().map(|(id, _)| id).collect();
    let mut deleted = 0usize;
    for chunk in ids.chunks(DELETE_BATCH_SIZE) {
        deleted += tokio::time::timeout(
            DELETE_BATCH_DEADLINE,
            messages_repo::delete_batch(&runtime.pool, chunk.to_vec()),
        )
        .await
        .map_err(|_| anyhow::anyhow!("message delete batch timed out"))??;
    }

    archives_repo::mark_archive_deleted(&runtime.pool, archive_id, now).await?;

    info!(
        org_id = archive.org_id,
        archive_id,
        start_date = %archive.start_date,
        deleted,
        "deleted archived messages"
    );
    Ok(deleted)
}

/// Delete the source flow runs behind a verified archive. Same protocol as
/// messages, with one extra gate: an interval containing a run that is still
/// active or waiting is never touched.
pub async fn delete_archived_runs(
    runtime: &Runtime,
    archive: &Archive,
    now: DateTime<Utc>,
) -> Result<usize> {
    let archive_id = archive.id.context("archive has no id")?;

    runtime
        .store
        .validate_archive(archive, runtime.config.check_s3_hashes)
        .await?;

    let rows = runs_repo::interval_rows(&runtime.pool, archive).await?;
    if let Some((run_id, status)) = rows
        .iter()
        .find(|(_, status)| runs::is_active_run_status(status))
    {
        bail!(
            "run {} in archive {} interval has active status {}",
            run_id,
            archive_id,
            status
        );
    }
    if rows.len() as i64 > archive.record_count {
        bail!(
            "interval holds {} runs but archive {} recorded {}",
            rows.len(),
            archive_id,
            archive.record_count
        );
    }

    let ids: Vec<i64> = rows.into_iter().map(|(id, _)| id).collect();
    let mut deleted = 0usize;
    for chunk in ids.chunks(DELETE_BATCH_SIZE) {
        deleted += tokio::time::timeout(
            DELETE_BATCH_DEADLINE,
            runs_repo::delete_batch(&runtime.pool, chunk.to_vec()),
        )
        .await
        .map_err(|_| anyhow::anyhow!("run delete batch timed out"))??;
    }

    archives_repo::mark_archive_deleted(&runtime.pool, archive_id, now).await?;

    info!(
        org_id = archive.org_id,
        archive_id,
        start_date = %archive.start_date,
        deleted,
        "deleted archived runs"
    );
    Ok(deleted)
}

/// Collect broadcasts past retention that are not schedule-bound and have no
/// remaining messages. One row per transaction, associations first, bounded
/// by the cleanup wall-clock budget.
pub async fn cleanup_broadcasts(runtime: &Runtime, org: &Org, now: DateTime<Utc>) -> Result<usize> {
    let cutoff = now - TimeDelta::days(runtime.config.retention_days);
    let started = Instant::now();

    let stale = messages_repo::stale_broadcast_ids(&runtime.pool, org.id, cutoff).await?;
    let total = stale.len();

    let mut removed = 0usize;
    for broadcast_id in stale {
        if started.elapsed() > CLEANUP_DEADLINE {
            warn!(
                org_id = org.id,
                removed,
                remaining = total - removed,
                "broadcast cleanup out of time, rest picked up next pass"
            );
            break;
        }
        messages_repo::delete_broadcast(&runtime.pool, broadcast_id).await?;
        removed += 1;
    }

    if removed > 0 {
        info!(org_id = org.id, removed, "removed stale broadcasts");
    }
    Ok(removed)
}

/// Collect flow starts past retention with no remaining runs
pub async fn cleanup_flow_starts(runtime: &Runtime, org: &Org, now: DateTime<Utc>) -> Result<usize> {
    let cutoff = now - TimeDelta::days(runtime.config.retention_days);
    let started = Instant::now();

    let stale = runs_repo::stale_flow_start_ids(&runtime.pool, org.id, cutoff).await?;
    let total = stale.len();

    let mut removed = 0usize;
    for start_id in stale {
        if started.elapsed() > CLEANUP_DEADLINE {
            warn!(
                org_id = org.id,
                removed,
                remaining = total - removed,
                "flow start cleanup out of time, rest picked up next pass"
            );
            break;
        }
        runs_repo::delete_flow_start(&runtime.pool, start_id).await?;
        removed += 1;
    }

    if removed > 0 {
        info!(org_id = org.id, removed, "removed stale flow starts");
    }
    Ok(removed)
}

/// Reclaim space and refresh planner statistics after a deletion pass.
/// VACUUM cannot run inside a transaction, so this goes through a bare
/// connection.
pub async fn vacuum_table(pool: &PgPool, table: &'static str) -> Result<()> {
    let pool = pool.clone();

    tokio::task::spawn_blocking(move || {
        use diesel::connection::SimpleConnection;

        let mut conn = pool.get()?;
        conn.batch_execute(&format!("VACUUM ANALYZE {}", table))
            .with_context(|| format!("failed to VACUUM ANALYZE {}", table))?;

        Ok::<(), anyhow::Error>(())
    })
    .await??;

    info!(table, "completed VACUUM ANALYZE");
    Ok(())
}
