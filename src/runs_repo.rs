use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::{Integer, Timestamptz};
use tracing::info;

use crate::archives::Archive;
use crate::runs::{RunExportRow, RunRecord};
use crate::runtime::PgPool;

/// Export query for flow runs, ordered for reproducible archives. Flows may
/// have been deleted out from under old runs, so the join is left.
const EXPORT_SQL: &str = r#"
SELECT r.id, r.uuid,
       f.uuid AS flow_uuid, f.name AS flow_name,
       c.uuid AS contact_uuid, c.name AS contact_name,
       r.responded, r.path, r.results,
       r.created_on, r.modified_on, r.exited_on, r.exit_type, r.status
  FROM flow_runs r
  JOIN contacts c ON c.id = r.contact_id
  LEFT JOIN flows f ON f.id = r.flow_id
 WHERE r.org_id = $1 AND r.modified_on >= $2 AND r.modified_on < $3
 ORDER BY r.modified_on, r.id
"#;

/// Stream the interval's flow runs into the archive sink, one JSON object
/// per line. An active or waiting run in the result set fails the whole
/// export. Returns the number of records written.
pub fn export(conn: &mut PgConnection, archive: &Archive, out: &mut dyn Write) -> Result<i64> {
    let rows = diesel::sql_query(EXPORT_SQL)
        .bind::<Integer, _>(archive.org_id)
        .bind::<Timestamptz, _>(archive.start_instant())
        .bind::<Timestamptz, _>(archive.end_instant())
        .load_iter::<RunExportRow, diesel::pg::PgRowByRowLoadingMode>(conn)
        .context("failed to start run export query")?;

    let mut count = 0i64;
    for row in rows {
        let row = row.context("failed to read run export row")?;
        let record = RunRecord::from_row(row)?;

        serde_json::to_writer(&mut *out, &record).context("failed to serialize run")?;
        out.write_all(b"\n")?;
        count += 1;

        if count % 10000 == 0 {
            info!(org_id = archive.org_id, "streamed {} runs to archive...", count);
        }
    }

    Ok(count)
}

/// All `(id, status)` pairs in the interval. The deleter refuses to touch an
/// interval containing active or waiting runs.
pub async fn interval_rows(pool: &PgPool, archive: &Archive) -> Result<Vec<(i64, String)>> {
    use crate::schema::flow_runs::dsl::*;

    let pool = pool.clone();
    let archive_org = archive.org_id;
    let start = archive.start_instant();
    let end = archive.end_instant();

    let rows = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;

        let rows = flow_runs
            .filter(org_id.eq(archive_org))
            .filter(modified_on.ge(start))
            .filter(modified_on.lt(end))
            .select((id, status))
            .load::<(i64, String)>(&mut conn)?;

        Ok::<Vec<(i64, String)>, anyhow::Error>(rows)
    })
    .await??;

    Ok(rows)
}

/// Delete one batch of runs in a single transaction with a server-side
/// statement timeout. Runs have no dependent rows in the current schema.
pub async fn delete_batch(pool: &PgPool, ids: Vec<i64>) -> Result<usize> {
    use crate::schema::flow_runs;

    let pool = pool.clone();

    let deleted = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;

        let deleted = conn.transaction::<usize, anyhow::Error, _>(|conn| {
            diesel::sql_query("SET LOCAL statement_timeout = '15min'").execute(conn)?;

            let deleted =
                diesel::delete(flow_runs::table.filter(flow_runs::id.eq_any(&ids)))
                    .execute(conn)?;

            Ok(deleted)
        })?;

        Ok::<usize, anyhow::Error>(deleted)
    })
    .await??;

    Ok(deleted)
}

/// Flow starts past retention with no remaining child runs
pub async fn stale_flow_start_ids(
    pool: &PgPool,
    for_org_id: i32,
    cutoff: DateTime<Utc>,
) -> Result<Vec<i64>> {
    use crate::schema::{flow_runs, flow_starts};
    use diesel::dsl::{exists, not};

    let pool = pool.clone();

    let ids = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;

        let ids = flow_starts::table
            .filter(flow_starts::org_id.eq(for_org_id))
            .filter(flow_starts::created_on.lt(cutoff))
            .filter(not(exists(
                flow_runs::table.filter(flow_runs::start_id.eq(flow_starts::id.nullable())),
            )))
            .order(flow_starts::id.asc())
            .select(flow_starts::id)
            .load::<i64>(&mut conn)?;

        Ok::<Vec<i64>, anyhow::Error>(ids)
    })
    .await??;

    Ok(ids)
}

/// Remove one stale flow start, its M2M association rows first, in one
/// transaction
pub async fn delete_flow_start(pool: &PgPool, start: i64) -> Result<()> {
    use crate::schema::{flow_start_contacts, flow_start_groups, flow_starts};

    let pool = pool.clone();

    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;

        conn.transaction::<(), anyhow::Error, _>(|conn| {
            diesel::delete(
                flow_start_contacts::table
                    .filter(flow_start_contacts::flowstart_id.eq(start)),
            )
            .execute(conn)?;
            diesel::delete(
                flow_start_groups::table.filter(flow_start_groups::flowstart_id.eq(start)),
            )
            .execute(conn)?;
            diesel::delete(flow_starts::table.filter(flow_starts::id.eq(start)))
                .execute(conn)?;
            Ok(())
        })?;

        Ok::<(), anyhow::Error>(())
    })
    .await??;

    Ok(())
}
