use std::io::Write;

use anyhow::{bail, Context, Result};
use md5::{Digest, Md5};
use tracing::info;

use crate::archives::{Archive, Period};
use crate::orgs::Org;
use crate::planner;
use crate::runtime::Runtime;
use crate::writer::ArchiveFileWriter;

/// Verifies and re-compresses one child blob: raw bytes are hashed as they
/// arrive, decompressed, and appended to the month's gzip stream. The hash
/// check only concludes once the blob is fully consumed.
struct ChildCopier<W: Write> {
    decoder: flate2::write::MultiGzDecoder<W>,
    digest: Md5,
}

impl<W: Write> ChildCopier<W> {
    fn new(sink: W) -> ChildCopier<W> {
        ChildCopier {
            decoder: flate2::write::MultiGzDecoder::new(sink),
            digest: Md5::new(),
        }
    }

    fn write_chunk(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        self.digest.update(chunk);
        self.decoder.write_all(chunk)
    }

    fn finish(self, expected_hash: &str) -> Result<()> {
        self.decoder
            .finish()
            .context("failed to finish decompressing day archive")?;
        let actual = hex::encode(self.digest.finalize());
        if actual != expected_hash {
            bail!(
                "day archive blob hashed to {}, metadata records {}",
                actual,
                expected_hash
            );
        }
        Ok(())
    }
}

/// Build a month archive by concatenating the decompressed payloads of its
/// already-uploaded day archives.
///
/// Fails fast when any day on or after the org's creation date has no day
/// archive. Children with zero records are counted as children but their
/// empty blobs are not fetched. The month's record count is the exact sum of
/// the children's; the month itself never needs deletion — the dailies it
/// subsumes carry their own deletion flags.
pub async fn build_rollup(
    runtime: &Runtime,
    org: &Org,
    month: &mut Archive,
    dailies: &[Archive],
) -> Result<()> {
    let missing = planner::missing_rollup_dailies(org, month, dailies);
    if !missing.is_empty() {
        bail!(
            "month {} is missing {} day archives (first {})",
            month.start_date,
            missing.len(),
            missing[0]
        );
    }

    let mut children: Vec<&Archive> = dailies
        .iter()
        .filter(|d| d.period == Period::Day && month.covers(d.start_date))
        .collect();
    children.sort_by_key(|d| d.start_date);

    let mut staged = ArchiveFileWriter::create(month, &runtime.config.temp_dir)?;
    let mut record_count = 0i64;
    let mut child_ids = Vec::with_capacity(children.len());

    let copied: Result<()> = async {
        for child in &children {
            child_ids.push(
                child
                    .id
                    .with_context(|| format!("day archive {} has no id", child.start_date))?,
            );
            record_count += child.record_count;
            if child.record_count == 0 {
                continue;
            }

            let mut body = runtime.store.get_archive(child).await?;
            let mut copier = ChildCopier::new(staged.writer());
            while let Some(chunk) = body
                .try_next()
                .await
                .with_context(|| format!("failed streaming day archive {}", child.start_date))?
            {
                copier.write_chunk(&chunk).with_context(|| {
                    format!("failed appending day archive {}", child.start_date)
                })?;
            }
            copier
                .finish(&child.hash)
                .with_context(|| format!("day archive {} failed verification", child.start_date))?;
        }
        Ok(())
    }
    .await;

    if let Err(e) = copied {
        staged.discard();
        return Err(e.context(format!(
            "rollup failed for {} {} org={}",
            month.archive_type, month.start_date, month.org_id
        )));
    }

    let sealed = staged.seal()?;

    month.record_count = record_count;
    month.size = sealed.size;
    month.hash = sealed.hash;
    month.build_time = sealed.elapsed_ms;
    month.archive_file = sealed.path.to_string_lossy().to_string();
    month.rollup_children = child_ids;
    month.needs_deletion = false;

    info!(
        org_id = month.org_id,
        archive_type = %month.archive_type,
        start_date = %month.start_date,
        children = month.rollup_children.len(),
        record_count = month.record_count,
        size = month.size,
        "built month rollup"
    );

    Ok(())
}
