use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::{Integer, Timestamptz};
use tracing::info;

use crate::archives::Archive;
use crate::messages::{is_deleted_visibility, MessageExportRow, MessageRecord};
use crate::runtime::PgPool;

/// Export query: one row per message in the interval, label aggregate
/// attached, ordered so two passes over unchanged data produce identical
/// archives.
const EXPORT_SQL: &str = r#"
SELECT m.id, m.broadcast_id,
       c.uuid AS contact_uuid, c.name AS contact_name,
       u.identity AS urn_identity,
       ch.uuid AS channel_uuid, ch.name AS channel_name,
       f.uuid AS flow_uuid, f.name AS flow_name,
       m.direction, m.msg_type, m.status, m.visibility, m.text, m.attachments,
       COALESCE(
           jsonb_agg(jsonb_build_object('uuid', l.uuid, 'name', l.name))
               FILTER (WHERE l.id IS NOT NULL),
           '[]'::jsonb
       ) AS labels,
       m.created_on, m.sent_on, m.modified_on
  FROM messages m
  JOIN contacts c ON c.id = m.contact_id
  LEFT JOIN contact_urns u ON u.id = m.contact_urn_id
  LEFT JOIN channels ch ON ch.id = m.channel_id
  LEFT JOIN flows f ON f.id = m.flow_id
  LEFT JOIN message_labels ml ON ml.message_id = m.id
  LEFT JOIN labels l ON l.id = ml.label_id
 WHERE m.org_id = $1 AND m.created_on >= $2 AND m.created_on < $3
 GROUP BY m.id, c.uuid, c.name, u.identity, ch.uuid, ch.name, f.uuid, f.name
 ORDER BY m.created_on, m.id
"#;

/// Stream the interval's messages into the archive sink, one JSON object per
/// line. Rows whose visibility resolves to "deleted" are skipped and not
/// counted. Returns the number of records written.
pub fn export(
    conn: &mut PgConnection,
    archive: &Archive,
    org_is_anon: bool,
    out: &mut dyn Write,
) -> Result<i64> {
    let rows = diesel::sql_query(EXPORT_SQL)
        .bind::<Integer, _>(archive.org_id)
        .bind::<Timestamptz, _>(archive.start_instant())
        .bind::<Timestamptz, _>(archive.end_instant())
        .load_iter::<MessageExportRow, diesel::pg::PgRowByRowLoadingMode>(conn)
        .context("failed to start message export query")?;

    let mut count = 0i64;
    for row in rows {
        let row = row.context("failed to read message export row")?;
        if is_deleted_visibility(&row.visibility) {
            continue;
        }

        let record = MessageRecord::from_row(row, org_is_anon);
        serde_json::to_writer(&mut *out, &record).context("failed to serialize message")?;
        out.write_all(b"\n")?;
        count += 1;

        if count % 10000 == 0 {
            info!(org_id = archive.org_id, "streamed {} messages to archive...", count);
        }
    }

    Ok(count)
}

/// All `(id, visibility)` pairs in the interval, whether or not they were
/// exported. The deleter uses the visibility to separate live rows from
/// soft-deleted ones before sanity-checking against the archive.
pub async fn interval_rows(pool: &PgPool, archive: &Archive) -> Result<Vec<(i64, String)>> {
    use crate::schema::messages::dsl::*;

    let pool = pool.clone();
    let archive_org = archive.org_id;
    let start = archive.start_instant();
    let end = archive.end_instant();

    let rows = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;

        let rows = messages
            .filter(org_id.eq(archive_org))
            .filter(created_on.ge(start))
            .filter(created_on.lt(end))
            .select((id, visibility))
            .load::<(i64, String)>(&mut conn)?;

        Ok::<Vec<(i64, String)>, anyhow::Error>(rows)
    })
    .await??;

    Ok(rows)
}

/// Delete one batch of messages and their label associations in a single
/// transaction with a server-side statement timeout. Returns the number of
/// message rows deleted.
pub async fn delete_batch(pool: &PgPool, ids: Vec<i64>) -> Result<usize> {
    use crate::schema::{message_labels, messages};

    let pool = pool.clone();

    let deleted = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;

        let deleted = conn.transaction::<usize, anyhow::Error, _>(|conn| {
            diesel::sql_query("SET LOCAL statement_timeout = '15min'").execute(conn)?;

            diesel::delete(
                message_labels::table.filter(message_labels::message_id.eq_any(&ids)),
            )
            .execute(conn)?;

            let deleted =
                diesel::delete(messages::table.filter(messages::id.eq_any(&ids))).execute(conn)?;

            Ok(deleted)
        })?;

        Ok::<usize, anyhow::Error>(deleted)
    })
    .await??;

    Ok(deleted)
}

/// Broadcasts old enough to be past retention, not bound to a schedule, with
/// no remaining child messages
pub async fn stale_broadcast_ids(
    pool: &PgPool,
    for_org_id: i32,
    cutoff: DateTime<Utc>,
) -> Result<Vec<i64>> {
    use crate::schema::{broadcasts, messages};
    use diesel::dsl::{exists, not};

    let pool = pool.clone();

    let ids = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;

        let ids = broadcasts::table
            .filter(broadcasts::org_id.eq(for_org_id))
            .filter(broadcasts::created_on.lt(cutoff))
            .filter(broadcasts::schedule_id.is_null())
            .filter(not(exists(
                messages::table.filter(messages::broadcast_id.eq(broadcasts::id.nullable())),
            )))
            .order(broadcasts::id.asc())
            .select(broadcasts::id)
            .load::<i64>(&mut conn)?;

        Ok::<Vec<i64>, anyhow::Error>(ids)
    })
    .await??;

    Ok(ids)
}

/// Remove one stale broadcast, its M2M association rows first, in one
/// transaction
pub async fn delete_broadcast(pool: &PgPool, broadcast: i64) -> Result<()> {
    use crate::schema::{broadcast_contacts, broadcast_groups, broadcast_urns, broadcasts};

    let pool = pool.clone();

    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;

        conn.transaction::<(), anyhow::Error, _>(|conn| {
            diesel::delete(
                broadcast_contacts::table
                    .filter(broadcast_contacts::broadcast_id.eq(broadcast)),
            )
            .execute(conn)?;
            diesel::delete(
                broadcast_groups::table.filter(broadcast_groups::broadcast_id.eq(broadcast)),
            )
            .execute(conn)?;
            diesel::delete(
                broadcast_urns::table.filter(broadcast_urns::broadcast_id.eq(broadcast)),
            )
            .execute(conn)?;
            diesel::delete(broadcasts::table.filter(broadcasts::id.eq(broadcast)))
                .execute(conn)?;
            Ok(())
        })?;

        Ok::<(), anyhow::Error>(())
    })
    .await??;

    Ok(())
}
