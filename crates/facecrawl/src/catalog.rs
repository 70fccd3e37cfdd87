//! SQLite catalog of stored images and their face index.
//!
//! One row per content hash in `image_records`. The face index tables
//! (`face_scans`, `face_detections`, `face_scan_failures`) live in the
//! same database and are managed by [`crate::index::FaceIndex`].

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::types::{ImageRecord, ScoutError, ScoutResult};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS image_records (
    content_hash  TEXT PRIMARY KEY,
    extension     TEXT NOT NULL,
    byte_len      INTEGER NOT NULL,
    page_url      TEXT NOT NULL,
    image_url     TEXT NOT NULL,
    source_site   TEXT NOT NULL,
    content_type  TEXT,
    page_title    TEXT,
    discovered_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS face_scans (
    content_hash TEXT PRIMARY KEY REFERENCES image_records(content_hash),
    face_count   INTEGER NOT NULL,
    scanned_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS face_detections (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    content_hash TEXT NOT NULL REFERENCES image_records(content_hash),
    x            INTEGER NOT NULL,
    y            INTEGER NOT NULL,
    width        INTEGER NOT NULL CHECK (width > 0),
    height       INTEGER NOT NULL CHECK (height > 0)
);

CREATE TABLE IF NOT EXISTS face_scan_failures (
    content_hash TEXT PRIMARY KEY REFERENCES image_records(content_hash),
    attempts     INTEGER NOT NULL,
    last_error   TEXT NOT NULL,
    failed_at    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_face_detections_hash ON face_detections(content_hash);
CREATE INDEX IF NOT EXISTS idx_image_records_discovered ON image_records(discovered_at);
";

/// Receives one record per stored image.
///
/// Must be idempotent on content hash: recording the same hash twice leaves
/// one row.
pub trait MetadataSink: Send + Sync {
    fn record(&self, record: &ImageRecord) -> ScoutResult<()>;
}

/// Aggregate numbers over the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogStats {
    pub records: u64,
    pub total_bytes: u64,
    pub sites: u64,
}

/// SQLite-backed catalog. Calls are short and synchronous; the connection
/// is never held across an await point.
pub struct Catalog {
    conn: Mutex<Connection>,
}

impl Catalog {
    /// Open or create a catalog database.
    pub fn open(path: &Path) -> ScoutResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        Self::init(conn)
    }

    /// In-memory catalog for tests and dry runs.
    pub fn open_in_memory() -> ScoutResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> ScoutResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> ScoutResult<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| ScoutError::Storage("catalog lock poisoned".to_string()))?;
        Ok(f(&mut conn)?)
    }

    /// Insert a record, or fill in missing metadata on an existing one.
    pub fn upsert(&self, record: &ImageRecord) -> ScoutResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO image_records (
                    content_hash, extension, byte_len, page_url, image_url,
                    source_site, content_type, page_title, discovered_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(content_hash) DO UPDATE SET
                    content_type = COALESCE(image_records.content_type, excluded.content_type),
                    page_title = COALESCE(image_records.page_title, excluded.page_title)",
                params![
                    record.content_hash,
                    record.extension,
                    record.byte_len as i64,
                    record.page_url,
                    record.image_url,
                    record.source_site,
                    record.content_type,
                    record.page_title,
                    record.discovered_at,
                ],
            )?;
            Ok(())
        })
    }

    /// Look up one record by content hash.
    pub fn get(&self, content_hash: &str) -> ScoutResult<Option<ImageRecord>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM image_records WHERE content_hash = ?1"),
                params![content_hash],
                record_from_row,
            )
            .optional()
        })
    }

    /// Most recently discovered records, newest first.
    pub fn recent(&self, limit: usize) -> ScoutResult<Vec<ImageRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM image_records
                 ORDER BY discovered_at DESC, rowid DESC LIMIT ?1"
            ))?;
            let rows = stmt.query_map(params![limit as i64], record_from_row)?;
            rows.collect()
        })
    }

    pub fn stats(&self) -> ScoutResult<CatalogStats> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(byte_len), 0), COUNT(DISTINCT source_site)
                 FROM image_records",
                [],
                |row| {
                    Ok(CatalogStats {
                        records: row.get::<_, i64>(0)? as u64,
                        total_bytes: row.get::<_, i64>(1)? as u64,
                        sites: row.get::<_, i64>(2)? as u64,
                    })
                },
            )
        })
    }
}

impl MetadataSink for Catalog {
    fn record(&self, record: &ImageRecord) -> ScoutResult<()> {
        self.upsert(record)
    }
}

const RECORD_COLUMNS: &str = "content_hash, extension, byte_len, page_url, image_url, \
     source_site, content_type, page_title, discovered_at";

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<ImageRecord> {
    Ok(ImageRecord {
        content_hash: row.get(0)?,
        extension: row.get(1)?,
        byte_len: row.get::<_, i64>(2)? as u64,
        page_url: row.get(3)?,
        image_url: row.get(4)?,
        source_site: row.get(5)?,
        content_type: row.get(6)?,
        page_title: row.get(7)?,
        discovered_at: row.get(8)?,
    })
}
