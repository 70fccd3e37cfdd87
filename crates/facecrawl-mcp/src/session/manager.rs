//! Shared server state: catalog, face index, crawler, and detector.
//!
//! The session is immutable after construction and shared behind an `Arc`.
//! Concurrent tool calls never serialize on it; the catalog guards its own
//! connection and no lock is held across a network call.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use facecrawl::catalog::CatalogStats;
use facecrawl::index::IndexStats;
use facecrawl::{
    Catalog, CrawlConfig, CrawlRequest, CrawlSummary, Crawler, FaceDetector, FaceIndex,
    FaceSearch, HttpFetcher, ImageRecord, IngestReport, PageFetcher, QueryResult, ScoutError,
    ScrfdDetector, SearchConfig,
};

use crate::config;
use crate::types::{McpError, McpResult};

/// Combined catalog and index statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub data_dir: String,
    pub detector_loaded: bool,
    pub catalog: CatalogStats,
    pub index: IndexStats,
}

/// Server session over one data directory.
pub struct ScoutSession {
    data_dir: PathBuf,
    image_dir: PathBuf,
    catalog: Arc<Catalog>,
    index: FaceIndex,
    fetcher: Arc<dyn PageFetcher>,
    crawl_config: CrawlConfig,
    search_config: SearchConfig,
    detector: Option<Arc<dyn FaceDetector>>,
    model_path: PathBuf,
}

impl ScoutSession {
    /// Open or create the data directory and try to load the detector.
    ///
    /// A missing or broken model is not fatal: crawling and lookups work,
    /// detection tools report `ModelNotAvailable`.
    pub fn open(data_dir: &Path, model_path: &Path) -> McpResult<Self> {
        let image_dir = config::image_dir(data_dir);
        std::fs::create_dir_all(&image_dir).map_err(|e| {
            McpError::Io(std::io::Error::other(format!(
                "Failed to create directory {}: {e}",
                image_dir.display()
            )))
        })?;

        let catalog = Arc::new(Catalog::open(&config::catalog_path(data_dir))?);
        let index = FaceIndex::new(catalog.clone());

        let crawl_config = CrawlConfig::default();
        let fetcher = HttpFetcher::new(&crawl_config.user_agent)
            .map_err(|e| McpError::InternalError(format!("Failed to build HTTP client: {e}")))?;

        let detector: Option<Arc<dyn FaceDetector>> = match ScrfdDetector::load(model_path) {
            Ok(detector) => Some(Arc::new(detector)),
            Err(e) => {
                tracing::warn!("Face detector unavailable: {e}. Crawling still works.");
                None
            }
        };

        let stats = catalog.stats()?;
        tracing::info!(
            "Session opened at {}. Catalog has {} images. Detector: {}",
            data_dir.display(),
            stats.records,
            if detector.is_some() { "loaded" } else { "missing" }
        );

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            image_dir,
            catalog,
            index,
            fetcher: Arc::new(fetcher),
            crawl_config,
            search_config: SearchConfig::default(),
            detector,
            model_path: model_path.to_path_buf(),
        })
    }

    /// Replace the face detector.
    pub fn with_detector(mut self, detector: Arc<dyn FaceDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Replace crawl tunables. Rebuilds the fetcher when the user agent changes.
    pub fn with_crawl_config(mut self, crawl_config: CrawlConfig) -> McpResult<Self> {
        if crawl_config.user_agent != self.crawl_config.user_agent {
            let fetcher = HttpFetcher::new(&crawl_config.user_agent).map_err(|e| {
                McpError::InternalError(format!("Failed to build HTTP client: {e}"))
            })?;
            self.fetcher = Arc::new(fetcher);
        }
        self.crawl_config = crawl_config;
        Ok(self)
    }

    pub fn with_search_config(mut self, search_config: SearchConfig) -> Self {
        self.search_config = search_config;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn image_dir(&self) -> &Path {
        &self.image_dir
    }

    pub fn has_detector(&self) -> bool {
        self.detector.is_some()
    }

    fn detector(&self) -> McpResult<Arc<dyn FaceDetector>> {
        self.detector.clone().ok_or_else(|| {
            McpError::ModelNotAvailable(format!(
                "no SCRFD model loaded from {}",
                self.model_path.display()
            ))
        })
    }

    /// Run one crawl session into this data directory.
    pub async fn crawl(
        &self,
        request: &CrawlRequest,
        cancel: CancellationToken,
    ) -> McpResult<CrawlSummary> {
        let crawler = Crawler::new(
            self.fetcher.clone(),
            self.catalog.clone(),
            self.image_dir.clone(),
            self.crawl_config.clone(),
        );
        Ok(crawler.crawl(request, cancel).await?)
    }

    /// Detect faces in up to `limit` unscanned images.
    pub async fn scan(&self, limit: usize) -> McpResult<IngestReport> {
        let detector = self.detector()?;
        Ok(self
            .index
            .ingest_pending(
                detector,
                &self.image_dir,
                self.search_config.detect_timeout,
                limit,
            )
            .await?)
    }

    /// Rank indexed faces against the largest face in `image_bytes`.
    pub async fn search(&self, image_bytes: Vec<u8>, limit: Option<usize>) -> McpResult<QueryResult> {
        let mut search_config = self.search_config.clone();
        if let Some(limit) = limit {
            search_config.max_results = limit;
        }
        let search = FaceSearch::new(self.index.clone(), self.detector()?, search_config);
        Ok(search.search(image_bytes).await?)
    }

    /// Catalog record for one content hash.
    pub async fn lookup(&self, content_hash: &str) -> McpResult<ImageRecord> {
        let catalog = self.catalog.clone();
        let hash = content_hash.to_string();
        self.blocking(move || {
            catalog
                .get(&hash)?
                .ok_or_else(|| ScoutError::ImageNotFound(hash.clone()))
        })
        .await
    }

    pub async fn recent(&self, limit: usize) -> McpResult<Vec<ImageRecord>> {
        let catalog = self.catalog.clone();
        self.blocking(move || catalog.recent(limit)).await
    }

    pub async fn stats(&self) -> McpResult<SessionStats> {
        let catalog = self.catalog.clone();
        let index = self.index.clone();
        let (catalog, index) = self
            .blocking(move || Ok((catalog.stats()?, index.stats()?)))
            .await?;
        Ok(SessionStats {
            data_dir: self.data_dir.display().to_string(),
            detector_loaded: self.has_detector(),
            catalog,
            index,
        })
    }

    /// Run catalog reads on the blocking pool; SQLite calls block.
    async fn blocking<T, F>(&self, f: F) -> McpResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, ScoutError> + Send + 'static,
    {
        let result = tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| McpError::InternalError(format!("catalog task failed: {e}")))?;
        Ok(result?)
    }
}
