use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::{ByteStream, Length};
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, ObjectCannedAcl};
use base64::Engine;
use tracing::info;

use crate::archives::Archive;
use crate::config::Config;

/// Largest blob a single PutObject may carry; bigger archives go multi-part
pub const MAX_SINGLE_PUT_BYTES: i64 = 5_000_000_000;
/// Part size for multi-part uploads
pub const MULTIPART_CHUNK_BYTES: i64 = 1_000_000_000;

/// Ceiling for a single PUT or one multi-part part
const UPLOAD_DEADLINE: Duration = Duration::from_secs(15 * 60);

/// The one object-store client in the process
pub struct ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl ObjectStore {
    pub async fn new(config: &Config) -> Result<ObjectStore> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.s3_region.clone()));

        if !config.aws_access_key_id.is_empty() {
            loader = loader.credentials_provider(Credentials::new(
                config.aws_access_key_id.clone(),
                config.aws_secret_access_key.clone(),
                None,
                None,
                "coldstore-config",
            ));
        }

        let shared = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if config.s3_minio {
            builder = builder
                .endpoint_url(&config.s3_endpoint)
                .force_path_style(true);
        } else if config.s3_endpoint != "https://s3.amazonaws.com" {
            builder = builder.endpoint_url(&config.s3_endpoint);
        }

        Ok(ObjectStore {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            bucket: config.s3_bucket.clone(),
        })
    }

    /// Startup reachability probe
    pub async fn probe(&self) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .with_context(|| format!("bucket {} is not reachable", self.bucket))?;
        Ok(())
    }

    /// Upload a sealed archive file and return its canonical URL
    pub async fn put_archive(&self, archive: &Archive) -> Result<String> {
        let key = archive.object_key();

        if archive.size <= MAX_SINGLE_PUT_BYTES {
            self.put_single(archive, &key).await?;
        } else {
            self.put_multipart(archive, &key).await?;
        }

        info!(
            org_id = archive.org_id,
            key = %key,
            size = archive.size,
            "uploaded archive"
        );
        Ok(archive.canonical_url(&self.bucket))
    }

    /// Single PUT with Content-MD5 so the store validates the body against
    /// the digest we computed while writing
    async fn put_single(&self, archive: &Archive, key: &str) -> Result<()> {
        let md5_b64 = content_md5(&archive.hash)?;
        let body = ByteStream::from_path(Path::new(&archive.archive_file))
            .await
            .with_context(|| format!("failed to open {} for upload", archive.archive_file))?;

        let send = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type("application/json")
            .content_encoding("gzip")
            .acl(ObjectCannedAcl::Private)
            .content_md5(&md5_b64)
            .metadata("md5chksum", &md5_b64)
            .send();

        tokio::time::timeout(UPLOAD_DEADLINE, send)
            .await
            .map_err(|_| anyhow::anyhow!("upload of {} timed out", key))?
            .with_context(|| format!("failed to upload archive to {}", key))?;
        Ok(())
    }

    /// Multi-part upload in fixed-size chunks. No Content-MD5; the store
    /// builds a composite ETag instead. An upload abandoned part-way is left
    /// for the bucket lifecycle policy to reap.
    async fn put_multipart(&self, archive: &Archive, key: &str) -> Result<()> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/json")
            .content_encoding("gzip")
            .acl(ObjectCannedAcl::Private)
            .metadata("md5chksum", content_md5(&archive.hash)?)
            .send()
            .await
            .with_context(|| format!("failed to start multi-part upload for {}", key))?;
        let upload_id = created
            .upload_id()
            .context("multi-part upload has no id")?
            .to_string();

        let mut parts = Vec::new();
        let mut offset = 0i64;
        let mut part_number = 1i32;
        while offset < archive.size {
            let length = MULTIPART_CHUNK_BYTES.min(archive.size - offset);
            let body = ByteStream::read_from()
                .path(Path::new(&archive.archive_file))
                .offset(offset as u64)
                .length(Length::Exact(length as u64))
                .build()
                .await
                .with_context(|| format!("failed to read part {} of {}", part_number, key))?;

            let send = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(&upload_id)
                .part_number(part_number)
                .body(body)
                .send();

            let uploaded = tokio::time::timeout(UPLOAD_DEADLINE, send)
                .await
                .map_err(|_| {
                    anyhow::anyhow!("upload of part {} of {} timed out", part_number, key)
                })?
                .with_context(|| format!("failed to upload part {} of {}", part_number, key))?;

            parts.push(
                CompletedPart::builder()
                    .set_e_tag(uploaded.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );
            offset += length;
            part_number += 1;
        }

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(&upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .with_context(|| format!("failed to complete multi-part upload for {}", key))?;
        Ok(())
    }

    /// Pre-deletion integrity check. Size must match exactly; when the store
    /// reports a usable MD5 ETag and hash checking is enabled, it must match
    /// the recorded hash. Multi-part blobs only ever carry composite tags, so
    /// size is all they can offer.
    pub async fn validate_archive(&self, archive: &Archive, check_hashes: bool) -> Result<()> {
        let key = archive.object_key();
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .with_context(|| format!("failed to HEAD archive blob {}", key))?;

        let size = head.content_length().unwrap_or(-1);
        if size != archive.size {
            bail!(
                "blob {} has size {}, archive recorded {}",
                key,
                size,
                archive.size
            );
        }

        if check_hashes
            && let Some(etag) = usable_md5_etag(head.e_tag())
            && etag != archive.hash
        {
            bail!(
                "blob {} has hash {}, archive recorded {}",
                key,
                etag,
                archive.hash
            );
        }

        Ok(())
    }

    /// Fetch a blob's compressed bytes as a stream
    pub async fn get_archive(&self, archive: &Archive) -> Result<ByteStream> {
        let key = archive.object_key();
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .with_context(|| format!("failed to fetch archive blob {}", key))?;
        Ok(object.body)
    }
}

/// Base64 Content-MD5 header value derived from the hex hash we store
fn content_md5(hex_hash: &str) -> Result<String> {
    let digest = hex::decode(hex_hash).context("archive hash is not valid hex")?;
    Ok(base64::engine::general_purpose::STANDARD.encode(digest))
}

/// An ETag that is a plain MD5: 32 hex digits, no multi-part part-count
/// suffix. Anything else cannot be compared to our digest.
fn usable_md5_etag(etag: Option<&str>) -> Option<String> {
    let tag = etag?.trim_matches('"');
    if tag.len() == 32 && tag.bytes().all(|b| b.is_ascii_hexdigit()) {
        Some(tag.to_ascii_lowercase())
    } else {
        None
    }
}
