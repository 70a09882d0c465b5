use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use md5::{Digest, Md5};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::archives::Archive;

/// Write adapter that feeds every byte it passes through into an MD5 digest.
/// Sits between the gzip encoder and the file so the digest covers exactly
/// the compressed bytes that reach disk.
pub struct DigestWriter<W: Write> {
    inner: W,
    digest: Md5,
}

impl<W: Write> DigestWriter<W> {
    pub fn new(inner: W) -> DigestWriter<W> {
        DigestWriter {
            inner,
            digest: Md5::new(),
        }
    }

    /// Consume the writer, returning the inner sink and the digest bytes
    pub fn finalize(self) -> (W, [u8; 16]) {
        (self.inner, self.digest.finalize().into())
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.digest.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// The staging file for one archive: buffered text into a gzip encoder into
/// an MD5 tee into the file. Closed in reverse order by `seal` so the gzip
/// trailer is on disk and in the digest before size and hash are read.
pub struct ArchiveFileWriter {
    path: PathBuf,
    writer: BufWriter<GzEncoder<DigestWriter<File>>>,
    started: Instant,
}

/// What `seal` measured once the chain was flushed and closed
pub struct SealedFile {
    pub path: PathBuf,
    pub size: i64,
    pub hash: String,
    pub elapsed_ms: i64,
}

impl ArchiveFileWriter {
    pub fn create(archive: &Archive, temp_dir: &Path) -> Result<ArchiveFileWriter> {
        let filename = format!(
            "{}{}.jsonl.gz",
            archive.temp_file_prefix(),
            Uuid::new_v4().simple()
        );
        let path = temp_dir.join(filename);
        let file = File::create(&path)
            .with_context(|| format!("failed to create archive file {}", path.display()))?;
        let digest = DigestWriter::new(file);
        let gz = GzEncoder::new(digest, Compression::default());

        Ok(ArchiveFileWriter {
            path,
            writer: BufWriter::new(gz),
            started: Instant::now(),
        })
    }

    pub fn writer(&mut self) -> &mut dyn Write {
        &mut self.writer
    }

    /// Flush and close the chain, sync the file, and measure it.
    /// The temp file is removed when sealing itself fails.
    pub fn seal(self) -> Result<SealedFile> {
        let path = self.path;
        let started = self.started;
        let mut writer = self.writer;

        let result = (|| {
            writer.flush().context("failed to flush archive buffer")?;
            let gz = writer
                .into_inner()
                .map_err(|e| anyhow::anyhow!("failed to unwrap archive buffer: {}", e))?;
            let digest = gz.finish().context("failed to finish gzip stream")?;
            let (file, md5) = digest.finalize();
            file.sync_all().context("failed to sync archive file")?;
            let size = file
                .metadata()
                .context("failed to stat archive file")?
                .len() as i64;
            Ok(SealedFile {
                path: path.clone(),
                size,
                hash: hex::encode(md5),
                elapsed_ms: started.elapsed().as_millis() as i64,
            })
        })();

        if result.is_err() {
            let _ = fs::remove_file(&path);
        }
        result
    }

    /// Abandon the file, removing it from disk
    pub fn discard(self) {
        let path = self.path.clone();
        drop(self.writer);
        let _ = fs::remove_file(&path);
    }
}

/// How long a staged file may sit before the startup sweep treats it as
/// debris from a crashed run
const STALE_STAGING_AGE: std::time::Duration = std::time::Duration::from_secs(24 * 60 * 60);

/// Remove staged archive files a previous run left behind. Only files with
/// our suffix are touched, and only once they are old enough that no live
/// pass can still be holding them.
pub fn sweep_staging_dir(temp_dir: &Path) -> Result<usize> {
    let mut removed = 0usize;
    for entry in fs::read_dir(temp_dir)
        .with_context(|| format!("cannot read temp directory {}", temp_dir.display()))?
    {
        let entry = entry?;
        if !entry.file_name().to_string_lossy().ends_with(".jsonl.gz") {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        let stale = modified
            .elapsed()
            .map(|age| age > STALE_STAGING_AGE)
            .unwrap_or(false);
        if stale && fs::remove_file(entry.path()).is_ok() {
            removed += 1;
        }
    }

    if removed > 0 {
        info!(removed, "swept stale staged archives");
    }
    Ok(removed)
}

/// Build one archive file by streaming the exporter into the chain.
///
/// On success the descriptor carries record count, compressed size, hex MD5,
/// build time and the staged file path. On failure the temp file is removed
/// and `archive_file` stays empty so the descriptor remains identifiable as
/// not built. An export that writes zero records still seals a valid (empty
/// gzip) archive.
pub fn build_archive<F>(archive: &mut Archive, temp_dir: &Path, export: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> Result<i64>,
{
    let mut staged = ArchiveFileWriter::create(archive, temp_dir)?;

    let record_count = match export(staged.writer()) {
        Ok(count) => count,
        Err(e) => {
            staged.discard();
            return Err(e.context(format!(
                "export failed for {} archive org={} start={}",
                archive.archive_type, archive.org_id, archive.start_date
            )));
        }
    };

    let sealed = staged.seal()?;

    archive.record_count = record_count;
    archive.size = sealed.size;
    archive.hash = sealed.hash;
    archive.build_time = sealed.elapsed_ms;
    archive.archive_file = sealed.path.to_string_lossy().to_string();

    info!(
        org_id = archive.org_id,
        archive_type = %archive.archive_type,
        period = %archive.period,
        start_date = %archive.start_date,
        record_count = archive.record_count,
        size = archive.size,
        hash = %archive.hash,
        "built archive file"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archives::{ArchiveType, Period};
    use chrono::NaiveDate;
    use flate2::read::MultiGzDecoder;
    use std::io::Read;

    fn archive() -> Archive {
        Archive::new(
            42,
            ArchiveType::Message,
            Period::Day,
            NaiveDate::from_ymd_opt(2017, 8, 12).unwrap(),
        )
    }

    fn decompress(path: &str) -> Vec<u8> {
        let mut out = Vec::new();
        MultiGzDecoder::new(File::open(path).unwrap())
            .read_to_end(&mut out)
            .unwrap();
        out
    }

    #[test]
    fn test_empty_archive_is_valid_and_self_consistent() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = archive();
        build_archive(&mut a, dir.path(), |_| Ok(0)).unwrap();

        assert_eq!(a.record_count, 0);
        assert!(!a.archive_file.is_empty());
        assert!(a.archive_file.contains("message_42_D20170812_"));

        let bytes = fs::read(&a.archive_file).unwrap();
        assert_eq!(bytes.len() as i64, a.size);
        assert_eq!(hex::encode(Md5::digest(&bytes)), a.hash);
        assert!(decompress(&a.archive_file).is_empty());
    }

    #[test]
    fn test_empty_archive_bytes_are_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = archive();
        let mut second = archive();
        build_archive(&mut first, dir.path(), |_| Ok(0)).unwrap();
        build_archive(&mut second, dir.path(), |_| Ok(0)).unwrap();

        assert_eq!(
            fs::read(&first.archive_file).unwrap(),
            fs::read(&second.archive_file).unwrap()
        );
        assert_eq!(first.hash, second.hash);
        assert_eq!(first.size, second.size);
    }

    #[test]
    fn test_records_round_trip_through_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = archive();
        build_archive(&mut a, dir.path(), |w| {
            w.write_all(b"{\"id\":1}\n")?;
            w.write_all(b"{\"id\":2}\n")?;
            Ok(2)
        })
        .unwrap();

        assert_eq!(a.record_count, 2);
        assert_eq!(decompress(&a.archive_file), b"{\"id\":1}\n{\"id\":2}\n");

        let bytes = fs::read(&a.archive_file).unwrap();
        assert_eq!(hex::encode(Md5::digest(&bytes)), a.hash);
        assert_eq!(bytes.len() as i64, a.size);
    }

    #[test]
    fn test_failed_export_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = archive();
        let result = build_archive(&mut a, dir.path(), |w| {
            w.write_all(b"partial")?;
            anyhow::bail!("database went away")
        });

        assert!(result.is_err());
        assert!(a.archive_file.is_empty());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_sweep_leaves_fresh_and_foreign_files_alone() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = archive();
        build_archive(&mut a, dir.path(), |_| Ok(0)).unwrap();
        fs::write(dir.path().join("unrelated.txt"), b"keep me").unwrap();

        // everything is brand new, nothing qualifies as stale
        assert_eq!(sweep_staging_dir(dir.path()).unwrap(), 0);
        assert!(std::path::Path::new(&a.archive_file).exists());
        assert!(dir.path().join("unrelated.txt").exists());
    }

    #[test]
    fn test_digest_writer_matches_direct_digest() {
        let mut w = DigestWriter::new(Vec::new());
        w.write_all(b"hello ").unwrap();
        w.write_all(b"world").unwrap();
        let (inner, md5) = w.finalize();

        assert_eq!(inner, b"hello world");
        assert_eq!(md5, <[u8; 16]>::from(Md5::digest(b"hello world")));
    }
}
