//! Core data types for crawled images, face detections, and query results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fetch::FetchError;

/// A downloaded image. Identity is the hash of its bytes, never its URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub content_hash: String,
    pub extension: String,
    pub byte_len: u64,
    pub page_url: String,
    pub image_url: String,
    pub source_site: String,
    pub content_type: Option<String>,
    pub page_title: Option<String>,
    pub discovered_at: DateTime<Utc>,
}

impl ImageRecord {
    /// File name the bytes are stored under: `<hash>.<ext>`.
    pub fn file_name(&self) -> String {
        stored_file_name(&self.content_hash, &self.extension)
    }
}

pub(crate) fn stored_file_name(content_hash: &str, extension: &str) -> String {
    format!("{content_hash}.{extension}")
}

/// Integer pixel bounding box of a detected face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl FaceBox {
    /// Build a box, rejecting zero-sized regions.
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> ScoutResult<Self> {
        if width == 0 || height == 0 {
            return Err(ScoutError::InvalidInput(format!(
                "face box must have positive size, got {width}x{height}"
            )));
        }
        Ok(Self {
            x,
            y,
            width,
            height,
        })
    }

    /// Area in pixels. Always derived from the box.
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// One face region recorded in the index for a stored image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    pub id: i64,
    pub content_hash: String,
    pub face: FaceBox,
}

impl FaceDetection {
    pub fn area(&self) -> u64 {
        self.face.area()
    }
}

/// An indexed face joined with the image it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedFace {
    pub detection: FaceDetection,
    pub file_name: String,
    pub image_url: String,
    pub page_url: String,
}

/// A single ranked search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryMatch {
    pub content_hash: String,
    pub file_name: String,
    pub image_url: String,
    pub page_url: String,
    pub face: FaceBox,
    pub area: u64,
    /// Area-proximity score in (0, 100]. A geometric proxy, not perceptual similarity.
    pub similarity: f32,
}

/// Ranked matches for one query image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub query_face: FaceBox,
    pub query_area: u64,
    pub faces_in_query: usize,
    pub matches: Vec<QueryMatch>,
}

/// What happened to one candidate image URL.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadOutcome {
    Stored(ImageRecord),
    SkippedDuplicate,
    SkippedTooSmall,
    SkippedNotImage,
    Failed(String),
}

impl DownloadOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, DownloadOutcome::Stored(_))
    }
}

/// Per-reason counts of images that were fetched but not stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipCounts {
    pub duplicate: usize,
    pub too_small: usize,
    pub not_image: usize,
}

/// Result of one crawl session. Returned even when every item failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSummary {
    pub start_url: String,
    pub pages_visited: usize,
    pub images_found: usize,
    pub images_downloaded: usize,
    pub images_failed: usize,
    pub skipped: SkipCounts,
    /// Most recent per-item errors, oldest first.
    pub errors: Vec<String>,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Errors that can occur in the crawler, index, or search engine.
#[derive(thiserror::Error, Debug)]
pub enum ScoutError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Detection error: {0}")]
    Detection(String),

    #[error("No face found in query image")]
    NoFaceFound,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Model not available: {0}")]
    ModelNotAvailable(String),

    #[error("Image not found: {0}")]
    ImageNotFound(String),
}

/// Convenience result type.
pub type ScoutResult<T> = Result<T, ScoutError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_face_box_rejects_zero_size() {
        assert!(FaceBox::new(0, 0, 0, 10).is_err());
        assert!(FaceBox::new(0, 0, 10, 0).is_err());
    }

    #[test]
    fn test_face_box_area() {
        let face = FaceBox::new(-4, 7, 30, 40).unwrap();
        assert_eq!(face.area(), 1200);
    }

    #[test]
    fn test_file_name_from_hash_and_extension() {
        let record = ImageRecord {
            content_hash: "abc123".to_string(),
            extension: "png".to_string(),
            byte_len: 10,
            page_url: "https://example.com/".to_string(),
            image_url: "https://example.com/a.png".to_string(),
            source_site: "example.com".to_string(),
            content_type: None,
            page_title: None,
            discovered_at: Utc::now(),
        };
        assert_eq!(record.file_name(), "abc123.png");
    }
}
