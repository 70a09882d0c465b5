use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;

use crate::archives::{Archive, ArchiveType, Period};
use crate::runtime::PgPool;
use crate::schema::archives;

type ArchiveRow = (
    i32,
    i32,
    String,
    String,
    NaiveDate,
    DateTime<Utc>,
    i64,
    i64,
    String,
    String,
    i64,
    bool,
    Option<DateTime<Utc>>,
    Option<i32>,
);

fn row_to_archive(row: ArchiveRow) -> Result<Archive> {
    let (
        id,
        org_id,
        archive_type,
        period,
        start_date,
        created_on,
        record_count,
        size,
        hash,
        url,
        build_time,
        needs_deletion,
        deleted_on,
        rollup_id,
    ) = row;

    Ok(Archive {
        id: Some(id),
        org_id,
        archive_type: ArchiveType::from_code(&archive_type)
            .ok_or_else(|| anyhow!("archive {} has unknown type code {}", id, archive_type))?,
        period: Period::from_code(&period)
            .ok_or_else(|| anyhow!("archive {} has unknown period code {}", id, period))?,
        start_date,
        created_on,
        record_count,
        size,
        hash,
        url,
        build_time,
        needs_deletion,
        deleted_on,
        rollup_id,
        archive_file: String::new(),
        rollup_children: Vec::new(),
    })
}

#[derive(Insertable)]
#[diesel(table_name = archives)]
struct NewArchiveRow<'a> {
    org_id: i32,
    archive_type: &'a str,
    period: &'a str,
    start_date: NaiveDate,
    created_on: DateTime<Utc>,
    record_count: i64,
    size: i64,
    hash: &'a str,
    url: &'a str,
    build_time: i64,
    needs_deletion: bool,
    deleted_on: Option<DateTime<Utc>>,
    rollup_id: Option<i32>,
}

/// All recorded archives for an org and record type, ascending by start date
pub async fn existing_archives(
    pool: &PgPool,
    for_org_id: i32,
    archive_type: ArchiveType,
) -> Result<Vec<Archive>> {
    let pool = pool.clone();

    let result = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;

        let rows = archives::table
            .filter(archives::org_id.eq(for_org_id))
            .filter(archives::archive_type.eq(archive_type.code()))
            .order(archives::start_date.asc())
            .select(archives::all_columns)
            .load::<ArchiveRow>(&mut conn)?;

        rows.into_iter().map(row_to_archive).collect::<Result<Vec<Archive>>>()
    })
    .await??;

    Ok(result)
}

/// Number of recorded archives for an org and record type
pub async fn archive_count(
    pool: &PgPool,
    for_org_id: i32,
    archive_type: ArchiveType,
) -> Result<i64> {
    let pool = pool.clone();

    let count = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;

        let count = archives::table
            .filter(archives::org_id.eq(for_org_id))
            .filter(archives::archive_type.eq(archive_type.code()))
            .count()
            .get_result::<i64>(&mut conn)?;

        Ok::<i64, anyhow::Error>(count)
    })
    .await??;

    Ok(count)
}

/// Insert the archive's metadata row and, for a rollup, point all child rows
/// at it, in one transaction. The number of children updated must equal the
/// number declared or the whole transaction rolls back. Returns the archive
/// with its assigned id.
pub async fn create_archive(pool: &PgPool, mut archive: Archive) -> Result<Archive> {
    let pool = pool.clone();

    let archive = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;

        let assigned = conn.transaction::<i32, anyhow::Error, _>(|conn| {
            let row = NewArchiveRow {
                org_id: archive.org_id,
                archive_type: archive.archive_type.code(),
                period: archive.period.code(),
                start_date: archive.start_date,
                created_on: archive.created_on,
                record_count: archive.record_count,
                size: archive.size,
                hash: &archive.hash,
                url: &archive.url,
                build_time: archive.build_time,
                needs_deletion: archive.needs_deletion,
                deleted_on: archive.deleted_on,
                rollup_id: archive.rollup_id,
            };

            let assigned = diesel::insert_into(archives::table)
                .values(&row)
                .returning(archives::id)
                .get_result::<i32>(conn)
                .context("failed to insert archive row")?;

            if !archive.rollup_children.is_empty() {
                let updated = diesel::update(
                    archives::table.filter(archives::id.eq_any(&archive.rollup_children)),
                )
                .set(archives::rollup_id.eq(assigned))
                .execute(conn)?;

                if updated != archive.rollup_children.len() {
                    bail!(
                        "rollup parent update touched {} rows, expected {}",
                        updated,
                        archive.rollup_children.len()
                    );
                }
            }

            Ok(assigned)
        })?;

        archive.id = Some(assigned);
        Ok::<Archive, anyhow::Error>(archive)
    })
    .await??;

    Ok(archive)
}

/// Uploaded archives whose source rows may still exist, months before days
/// on equal start dates
pub async fn archives_needing_deletion(
    pool: &PgPool,
    for_org_id: i32,
    archive_type: ArchiveType,
) -> Result<Vec<Archive>> {
    let pool = pool.clone();

    let result = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;

        let rows = archives::table
            .filter(archives::org_id.eq(for_org_id))
            .filter(archives::archive_type.eq(archive_type.code()))
            .filter(archives::needs_deletion.eq(true))
            .filter(archives::url.ne(""))
            .order((archives::start_date.asc(), archives::period.desc()))
            .select(archives::all_columns)
            .load::<ArchiveRow>(&mut conn)?;

        rows.into_iter().map(row_to_archive).collect::<Result<Vec<Archive>>>()
    })
    .await??;

    Ok(result)
}

/// Mark an archive's deletion complete: both fields flip in one statement
pub async fn mark_archive_deleted(
    pool: &PgPool,
    archive_id: i32,
    when: DateTime<Utc>,
) -> Result<()> {
    let pool = pool.clone();

    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;

        let updated = diesel::update(archives::table.filter(archives::id.eq(archive_id)))
            .set((
                archives::needs_deletion.eq(false),
                archives::deleted_on.eq(Some(when)),
            ))
            .execute(&mut conn)?;

        if updated != 1 {
            bail!("archive {} missing while marking deletion complete", archive_id);
        }

        Ok::<(), anyhow::Error>(())
    })
    .await??;

    Ok(())
}
