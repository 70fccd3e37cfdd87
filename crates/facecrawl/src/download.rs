//! Image downloader: candidate URL to stored file plus content identity.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use image::ImageFormat;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::catalog::MetadataSink;
use crate::config::CrawlConfig;
use crate::dedup::{content_hash, ContentDedup};
use crate::fetch::PageFetcher;
use crate::types::{stored_file_name, DownloadOutcome, ImageRecord, ScoutError};

/// Extension used when neither the URL nor the bytes identify the format.
const FALLBACK_EXTENSION: &str = "jpg";

/// Without a usable content type, bodies at least this large are accepted.
const UNTYPED_MIN_BYTES: usize = 1000;

const KNOWN_EXTENSIONS: [&str; 10] = [
    "jpg", "jpeg", "png", "gif", "webp", "bmp", "tif", "tiff", "avif", "ico",
];

/// One image URL discovered on a page.
#[derive(Debug, Clone)]
pub struct ImageCandidate {
    pub image_url: Url,
    pub page_url: Url,
    pub page_title: Option<String>,
}

/// Fetches candidates and stores each distinct content hash exactly once.
#[derive(Clone)]
pub struct Downloader {
    fetcher: Arc<dyn PageFetcher>,
    sink: Arc<dyn MetadataSink>,
    dedup: Arc<ContentDedup>,
    image_dir: PathBuf,
    timeout: Duration,
    min_bytes: usize,
}

impl Downloader {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        sink: Arc<dyn MetadataSink>,
        dedup: Arc<ContentDedup>,
        image_dir: impl Into<PathBuf>,
        config: &CrawlConfig,
    ) -> Self {
        Self {
            fetcher,
            sink,
            dedup,
            image_dir: image_dir.into(),
            timeout: config.image_timeout,
            min_bytes: config.min_image_bytes,
        }
    }

    pub fn image_dir(&self) -> &Path {
        &self.image_dir
    }

    /// Download one candidate. Never panics and never returns an error:
    /// every failure is folded into [`DownloadOutcome::Failed`].
    pub async fn download(&self, candidate: &ImageCandidate) -> DownloadOutcome {
        let url = &candidate.image_url;
        if self.dedup.has_url(url) {
            tracing::debug!(%url, "image URL already handled");
            return DownloadOutcome::SkippedDuplicate;
        }

        let fetched = match self.fetcher.get(url, self.timeout).await {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(%url, error = %e, "image fetch failed");
                return DownloadOutcome::Failed(format!("{url}: {e}"));
            }
        };

        let bytes = fetched.body;
        if bytes.len() < self.min_bytes {
            tracing::debug!(%url, len = bytes.len(), "image below size floor");
            return DownloadOutcome::SkippedTooSmall;
        }

        let sniffed = image::guess_format(&bytes).ok();
        if !is_image_payload(fetched.content_type.as_deref(), sniffed, bytes.len()) {
            tracing::debug!(%url, content_type = ?fetched.content_type, "not an image");
            return DownloadOutcome::SkippedNotImage;
        }

        let hash = content_hash(&bytes);
        if !self.dedup.claim_hash(&hash) {
            self.dedup.mark_url(url);
            tracing::debug!(%url, %hash, "duplicate content");
            return DownloadOutcome::SkippedDuplicate;
        }

        let extension = derive_extension(url, sniffed);
        let path = self.image_dir.join(stored_file_name(&hash, &extension));

        match write_exclusive(&path, &bytes).await {
            Ok(true) => {}
            Ok(false) => {
                // Stored by an earlier session.
                self.dedup.mark_url(url);
                tracing::debug!(%url, %hash, "content already on disk");
                return DownloadOutcome::SkippedDuplicate;
            }
            Err(e) => {
                self.dedup.release_hash(&hash);
                tracing::warn!(path = %path.display(), error = %e, "failed to write image");
                return DownloadOutcome::Failed(format!("{url}: write failed: {e}"));
            }
        }

        let record = ImageRecord {
            content_hash: hash.clone(),
            extension,
            byte_len: bytes.len() as u64,
            page_url: candidate.page_url.to_string(),
            image_url: url.to_string(),
            source_site: candidate.page_url.host_str().unwrap_or_default().to_string(),
            content_type: fetched.content_type,
            page_title: candidate.page_title.clone(),
            discovered_at: Utc::now(),
        };

        // The sink may be a blocking database write.
        let sink = self.sink.clone();
        let pending = record.clone();
        let recorded = tokio::task::spawn_blocking(move || sink.record(&pending))
            .await
            .map_err(|e| ScoutError::Storage(format!("metadata task failed: {e}")))
            .and_then(|result| result);
        if let Err(e) = recorded {
            let _ = tokio::fs::remove_file(&path).await;
            self.dedup.release_hash(&hash);
            tracing::warn!(%url, error = %e, "failed to record image metadata");
            return DownloadOutcome::Failed(format!("{url}: metadata: {e}"));
        }

        self.dedup.mark_url(url);
        tracing::debug!(%url, %hash, bytes = record.byte_len, "stored image");
        DownloadOutcome::Stored(record)
    }
}

/// Create the file only if absent. `Ok(false)` means it already existed.
async fn write_exclusive(path: &Path, bytes: &[u8]) -> std::io::Result<bool> {
    let mut file = match tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
    {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e),
    };

    let written = async {
        file.write_all(bytes).await?;
        file.flush().await
    }
    .await;

    if let Err(e) = written {
        drop(file);
        let _ = tokio::fs::remove_file(path).await;
        return Err(e);
    }
    Ok(true)
}

/// Decide whether a body is an image.
///
/// A declared `image/*` type (other than SVG) wins. Otherwise the magic
/// bytes decide. With no usable header the body length is the last resort.
fn is_image_payload(content_type: Option<&str>, sniffed: Option<ImageFormat>, len: usize) -> bool {
    let declared = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase())
        .filter(|ct| !ct.is_empty());

    if let Some(ct) = declared.as_deref() {
        if ct.starts_with("image/") && !ct.starts_with("image/svg") {
            return true;
        }
    }
    if sniffed.is_some() {
        return true;
    }
    match declared.as_deref() {
        None | Some("application/octet-stream") | Some("binary/octet-stream") => {
            len >= UNTYPED_MIN_BYTES
        }
        Some(_) => false,
    }
}

/// File extension from the URL path, then the sniffed format, then `jpg`.
fn derive_extension(url: &Url, sniffed: Option<ImageFormat>) -> String {
    let from_path = url
        .path_segments()
        .and_then(|mut segs| segs.next_back())
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| KNOWN_EXTENSIONS.contains(&ext.as_str()));

    let ext = from_path
        .or_else(|| {
            sniffed
                .and_then(|f| f.extensions_str().first().copied())
                .map(str::to_string)
        })
        .unwrap_or_else(|| FALLBACK_EXTENSION.to_string());

    if ext == "jpeg" {
        FALLBACK_EXTENSION.to_string()
    } else {
        ext
    }
}
