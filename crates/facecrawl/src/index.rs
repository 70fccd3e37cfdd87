//! Append-only face index over stored images.
//!
//! Each image moves once from unscanned to scanned. The scan marker and the
//! image's detections are written in one transaction, and detections
//! reference an existing `image_records` row, so a reader never sees a face
//! for an image that is not fully recorded.
//!
//! Failed scans are counted per image. Images that failed before are
//! retried after fresh ones, and dropped from the queue once they reach
//! [`MAX_SCAN_ATTEMPTS`], so a handful of undecodable files cannot starve
//! the rest of the catalog.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::detector::FaceDetector;
use crate::types::{
    stored_file_name, FaceBox, FaceDetection, ImageRecord, IndexedFace, ScoutError, ScoutResult,
};

/// Number of scans listed in [`IndexStats::recent_scans`].
const RECENT_SCANS: usize = 10;

/// Failed scans after which an image is no longer offered for ingestion.
pub const MAX_SCAN_ATTEMPTS: u32 = 3;

/// One completed scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub content_hash: String,
    pub file_name: String,
    pub face_count: u32,
    pub scanned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub images: u64,
    pub scanned: u64,
    pub unscanned: u64,
    /// Unscanned images that reached [`MAX_SCAN_ATTEMPTS`].
    pub abandoned: u64,
    pub faces: u64,
    pub recent_scans: Vec<ScanSummary>,
}

/// Result of one ingestion pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestReport {
    pub processed: usize,
    pub faces_found: usize,
    /// Images that could not be read or scanned. They stay unscanned and
    /// their failure is counted.
    pub errors: Vec<String>,
}

/// Face index handle. Cheap to clone.
#[derive(Clone)]
pub struct FaceIndex {
    catalog: Arc<Catalog>,
}

impl FaceIndex {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Stored images without a scan marker that are still worth trying.
    ///
    /// Never-attempted images come first, then those with fewer failed
    /// attempts; ties keep catalog insertion order.
    pub fn pending(&self, limit: usize) -> ScoutResult<Vec<ImageRecord>> {
        let hashes: Vec<String> = self.catalog.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.content_hash FROM image_records r
                 LEFT JOIN face_scans s ON s.content_hash = r.content_hash
                 LEFT JOIN face_scan_failures f ON f.content_hash = r.content_hash
                 WHERE s.content_hash IS NULL AND COALESCE(f.attempts, 0) < ?2
                 ORDER BY COALESCE(f.attempts, 0), r.rowid LIMIT ?1",
            )?;
            let rows = stmt.query_map(
                params![limit as i64, MAX_SCAN_ATTEMPTS as i64],
                |row| row.get(0),
            )?;
            rows.collect()
        })?;

        let mut records = Vec::with_capacity(hashes.len());
        for hash in hashes {
            if let Some(record) = self.catalog.get(&hash)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Count one failed scan. Returns the attempts so far.
    pub fn record_failure(&self, content_hash: &str, error: &str) -> ScoutResult<u32> {
        self.catalog.with_conn(|conn| {
            conn.query_row(
                "INSERT INTO face_scan_failures (content_hash, attempts, last_error, failed_at)
                 VALUES (?1, 1, ?2, ?3)
                 ON CONFLICT(content_hash) DO UPDATE SET
                    attempts = face_scan_failures.attempts + 1,
                    last_error = excluded.last_error,
                    failed_at = excluded.failed_at
                 RETURNING attempts",
                params![content_hash, error, Utc::now()],
                |row| row.get(0),
            )
        })
    }

    /// Failed attempts recorded for an image.
    pub fn failed_attempts(&self, content_hash: &str) -> ScoutResult<u32> {
        self.catalog.with_conn(|conn| {
            conn.query_row(
                "SELECT attempts FROM face_scan_failures WHERE content_hash = ?1",
                params![content_hash],
                |row| row.get(0),
            )
            .optional()
            .map(Option::unwrap_or_default)
        })
    }

    pub fn is_scanned(&self, content_hash: &str) -> ScoutResult<bool> {
        self.catalog.with_conn(|conn| {
            conn.query_row(
                "SELECT 1 FROM face_scans WHERE content_hash = ?1",
                params![content_hash],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
        })
    }

    /// Mark an image scanned and append its detections atomically.
    ///
    /// Returns `false` without writing if the image was already scanned.
    /// Fails if the image has no catalog record.
    pub fn record_scan(&self, content_hash: &str, faces: &[FaceBox]) -> ScoutResult<bool> {
        if faces.iter().any(|f| f.width == 0 || f.height == 0) {
            return Err(ScoutError::InvalidInput(
                "face boxes must have positive size".to_string(),
            ));
        }

        self.catalog.with_conn(|conn| {
            let tx = conn.transaction()?;
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO face_scans (content_hash, face_count, scanned_at)
                 VALUES (?1, ?2, ?3)",
                params![content_hash, faces.len() as i64, Utc::now()],
            )?;
            if inserted == 0 {
                return Ok(false);
            }
            tx.execute(
                "DELETE FROM face_scan_failures WHERE content_hash = ?1",
                params![content_hash],
            )?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO face_detections (content_hash, x, y, width, height)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for face in faces {
                    stmt.execute(params![
                        content_hash,
                        face.x,
                        face.y,
                        face.width,
                        face.height
                    ])?;
                }
            }
            tx.commit()?;
            Ok(true)
        })
    }

    /// Detections of one image in detector order.
    pub fn faces_for(&self, content_hash: &str) -> ScoutResult<Vec<FaceDetection>> {
        self.catalog.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, content_hash, x, y, width, height FROM face_detections
                 WHERE content_hash = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![content_hash], |row| {
                Ok(FaceDetection {
                    id: row.get(0)?,
                    content_hash: row.get(1)?,
                    face: FaceBox {
                        x: row.get(2)?,
                        y: row.get(3)?,
                        width: row.get(4)?,
                        height: row.get(5)?,
                    },
                })
            })?;
            rows.collect()
        })
    }

    /// Indexed faces whose area lies in `[query/2, query*2]`, in insertion order.
    pub fn candidates(&self, query_area: u64) -> ScoutResult<Vec<IndexedFace>> {
        let q = i64::try_from(query_area)
            .map_err(|_| ScoutError::InvalidInput(format!("query area too large: {query_area}")))?;

        self.catalog.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT d.id, d.content_hash, d.x, d.y, d.width, d.height,
                        r.extension, r.image_url, r.page_url
                 FROM face_detections d
                 JOIN image_records r ON r.content_hash = d.content_hash
                 WHERE 2 * d.width * d.height >= ?1
                   AND d.width * d.height <= 2 * ?1
                 ORDER BY d.id",
            )?;
            let rows = stmt.query_map(params![q], |row| {
                let content_hash: String = row.get(1)?;
                let extension: String = row.get(6)?;
                Ok(IndexedFace {
                    file_name: stored_file_name(&content_hash, &extension),
                    detection: FaceDetection {
                        id: row.get(0)?,
                        content_hash,
                        face: FaceBox {
                            x: row.get(2)?,
                            y: row.get(3)?,
                            width: row.get(4)?,
                            height: row.get(5)?,
                        },
                    },
                    image_url: row.get(7)?,
                    page_url: row.get(8)?,
                })
            })?;
            rows.collect()
        })
    }

    pub fn stats(&self) -> ScoutResult<IndexStats> {
        self.catalog.with_conn(|conn| {
            let count = |sql: &str| -> rusqlite::Result<u64> {
                conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                    .map(|n| n as u64)
            };
            let images = count("SELECT COUNT(*) FROM image_records")?;
            let scanned = count("SELECT COUNT(*) FROM face_scans")?;
            let faces = count("SELECT COUNT(*) FROM face_detections")?;
            let abandoned = conn.query_row(
                "SELECT COUNT(*) FROM face_scan_failures f
                 LEFT JOIN face_scans s ON s.content_hash = f.content_hash
                 WHERE s.content_hash IS NULL AND f.attempts >= ?1",
                params![MAX_SCAN_ATTEMPTS as i64],
                |row| row.get::<_, i64>(0),
            )? as u64;

            let mut stmt = conn.prepare(
                "SELECT s.content_hash, r.extension, s.face_count, s.scanned_at
                 FROM face_scans s JOIN image_records r ON r.content_hash = s.content_hash
                 ORDER BY s.scanned_at DESC, s.rowid DESC LIMIT ?1",
            )?;
            let recent_scans = stmt
                .query_map(params![RECENT_SCANS as i64], |row| {
                    let content_hash: String = row.get(0)?;
                    let extension: String = row.get(1)?;
                    Ok(ScanSummary {
                        file_name: stored_file_name(&content_hash, &extension),
                        content_hash,
                        face_count: row.get(2)?,
                        scanned_at: row.get(3)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(IndexStats {
                images,
                scanned,
                unscanned: images.saturating_sub(scanned),
                abandoned,
                faces,
                recent_scans,
            })
        })
    }

    /// Run the detector over up to `limit` unscanned images.
    ///
    /// Unreadable files, undecodable images, detector failures and timeouts
    /// are reported and counted against the image, which stays unscanned
    /// for a later pass until it runs out of attempts.
    pub async fn ingest_pending(
        &self,
        detector: Arc<dyn FaceDetector>,
        image_dir: &Path,
        timeout: Duration,
        limit: usize,
    ) -> ScoutResult<IngestReport> {
        let pending = self.blocking(move |index| index.pending(limit)).await?;
        tracing::info!(pending = pending.len(), "face ingestion started");

        let mut report = IngestReport::default();
        for record in pending {
            let file_name = record.file_name();
            let path = image_dir.join(&file_name);

            let scanned = match tokio::fs::read(&path).await {
                Ok(bytes) => detect_with_timeout(detector.clone(), bytes, timeout).await,
                Err(e) => Err(ScoutError::Io(e)),
            };

            let faces = match scanned {
                Ok(faces) => faces,
                Err(e) => {
                    tracing::warn!(file = %file_name, error = %e, "face scan failed");
                    report.errors.push(format!("{file_name}: {e}"));
                    self.note_failure(record.content_hash, e.to_string()).await;
                    continue;
                }
            };

            let face_count = faces.len();
            let hash = record.content_hash;
            if self
                .blocking(move |index| index.record_scan(&hash, &faces))
                .await?
            {
                report.processed += 1;
                report.faces_found += face_count;
                tracing::debug!(file = %file_name, faces = face_count, "image scanned");
            }
        }

        tracing::info!(
            processed = report.processed,
            faces = report.faces_found,
            errors = report.errors.len(),
            "face ingestion finished"
        );
        Ok(report)
    }

    async fn note_failure(&self, content_hash: String, error: String) {
        let recorded = self
            .blocking(move |index| index.record_failure(&content_hash, &error))
            .await;
        match recorded {
            Ok(attempts) if attempts >= MAX_SCAN_ATTEMPTS => {
                tracing::warn!(attempts, "image dropped from the scan queue");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "cannot record scan failure"),
        }
    }

    /// Run a catalog operation on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> ScoutResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&FaceIndex) -> ScoutResult<T> + Send + 'static,
    {
        let index = self.clone();
        tokio::task::spawn_blocking(move || f(&index))
            .await
            .map_err(|e| ScoutError::Storage(format!("index task failed: {e}")))?
    }
}

/// Run a detector off the async runtime, bounded by `timeout`.
pub(crate) async fn detect_with_timeout(
    detector: Arc<dyn FaceDetector>,
    bytes: Vec<u8>,
    timeout: Duration,
) -> ScoutResult<Vec<FaceBox>> {
    let task = tokio::task::spawn_blocking(move || detector.detect(&bytes));
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(ScoutError::Detection(format!("detector task failed: {e}"))),
        Err(_) => Err(ScoutError::Timeout(format!(
            "face detection exceeded {timeout:?}"
        ))),
    }
}
