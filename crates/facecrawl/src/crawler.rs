//! Breadth-first, domain-bounded crawl session.
//!
//! One traversal task owns the frontier and fetches pages sequentially with
//! a fixed politeness delay. Image downloads run on a semaphore-gated pool
//! of workers; dispatch waits while every worker is busy.
//!
//! The image budget is checked both at dispatch and again inside each worker
//! before it fetches. A worker that passed the check still finishes, so the
//! final download count can exceed `max_images` by at most the pool size.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::catalog::MetadataSink;
use crate::config::CrawlConfig;
use crate::dedup::{ContentDedup, Frontier};
use crate::download::{Downloader, ImageCandidate};
use crate::extract::{extract, same_host};
use crate::fetch::PageFetcher;
use crate::types::{CrawlSummary, DownloadOutcome, ScoutError, ScoutResult, SkipCounts};

/// Parameters of one crawl session.
#[derive(Debug, Clone)]
pub struct CrawlRequest {
    pub start_url: String,
    pub max_pages: usize,
    pub max_images: usize,
    /// Pause between consecutive page fetches.
    pub politeness_delay: Duration,
}

impl CrawlRequest {
    pub fn new(start_url: impl Into<String>) -> Self {
        Self {
            start_url: start_url.into(),
            max_pages: 10,
            max_images: 200,
            politeness_delay: Duration::from_millis(500),
        }
    }

    /// Parse and check the start URL. Rejected before any fetch happens.
    pub fn validate(&self) -> ScoutResult<Url> {
        let url = Url::parse(self.start_url.trim()).map_err(|e| {
            ScoutError::InvalidInput(format!("invalid start URL '{}': {e}", self.start_url))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ScoutError::InvalidInput(format!(
                "start URL must be http or https, got '{}'",
                url.scheme()
            )));
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(ScoutError::InvalidInput(format!(
                "start URL has no host: '{}'",
                self.start_url
            )));
        }
        Ok(url)
    }
}

/// Crawl engine. Cheap to clone; each call to [`Crawler::crawl`] is an
/// independent session with its own frontier and dedup state.
#[derive(Clone)]
pub struct Crawler {
    fetcher: Arc<dyn PageFetcher>,
    sink: Arc<dyn MetadataSink>,
    image_dir: PathBuf,
    config: CrawlConfig,
}

impl Crawler {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        sink: Arc<dyn MetadataSink>,
        image_dir: impl Into<PathBuf>,
        config: CrawlConfig,
    ) -> Self {
        Self {
            fetcher,
            sink,
            image_dir: image_dir.into(),
            config,
        }
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    /// Run one session to completion, budget exhaustion, or cancellation.
    ///
    /// Only an invalid request or an unusable image directory is an error;
    /// every per-page and per-image failure lands in the summary instead.
    pub async fn crawl(
        &self,
        request: &CrawlRequest,
        cancel: CancellationToken,
    ) -> ScoutResult<CrawlSummary> {
        let start = request.validate()?;
        tokio::fs::create_dir_all(&self.image_dir).await?;

        let started_at = Utc::now();
        tracing::info!(
            url = %start,
            max_pages = request.max_pages,
            max_images = request.max_images,
            "crawl started"
        );

        let downloader = Downloader::new(
            self.fetcher.clone(),
            self.sink.clone(),
            Arc::new(ContentDedup::new()),
            self.image_dir.clone(),
            &self.config,
        );
        let tally = Arc::new(Tally::new(self.config.max_errors));
        let pool = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut workers: JoinSet<()> = JoinSet::new();

        let mut frontier = Frontier::new(self.config.strip_query);
        frontier.push(&start);
        // Host the crawl stays on. The start page may redirect to another
        // host, which is then adopted.
        let mut crawl_base = start.clone();

        let mut images_found = 0usize;
        let mut cancelled = false;
        let mut first_page = true;

        'pages: loop {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            if frontier.visited() >= request.max_pages
                || tally.downloaded() >= request.max_images
                || frontier.is_empty()
            {
                break;
            }

            if !first_page && !request.politeness_delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        cancelled = true;
                        break;
                    }
                    _ = tokio::time::sleep(request.politeness_delay) => {}
                }
            }
            first_page = false;

            let Some(page_url) = frontier.pop() else {
                break;
            };
            tracing::debug!(url = %page_url, "fetching page");

            let page = match self.fetcher.get(&page_url, self.config.page_timeout).await {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!(url = %page_url, error = %e, "page fetch failed");
                    tally.push_error(format!("{page_url}: {e}"));
                    continue;
                }
            };

            if frontier.visited() == 1 {
                if !same_host(&page.final_url, &start) {
                    tracing::info!(from = %start, to = %page.final_url, "start page redirected");
                }
                crawl_base = page.final_url.clone();
            } else if !same_host(&page.final_url, &crawl_base) {
                tracing::warn!(url = %page_url, to = %page.final_url, "page redirected off-site");
                tally.push_error(format!(
                    "{page_url}: redirected off-site to {}",
                    page.final_url
                ));
                continue;
            }
            frontier.mark_seen(&page.final_url);

            let base = page.final_url.clone();
            let body = page.body;
            let extracted = match tokio::task::spawn_blocking(move || extract(&base, &body)).await
            {
                Ok(extracted) => extracted,
                Err(e) => {
                    tracing::warn!(url = %page_url, error = %e, "page parse failed");
                    tally.push_error(format!("{page_url}: parse failed: {e}"));
                    continue;
                }
            };

            images_found += extracted.images.len();
            tracing::debug!(
                url = %page_url,
                images = extracted.images.len(),
                links = extracted.links.len(),
                "page extracted"
            );

            for image_url in extracted.images {
                if self.config.is_denied(image_url.as_str()) {
                    continue;
                }
                if cancel.is_cancelled() {
                    cancelled = true;
                    break 'pages;
                }
                if tally.downloaded() >= request.max_images {
                    break;
                }

                let permit = tokio::select! {
                    _ = cancel.cancelled() => {
                        cancelled = true;
                        break 'pages;
                    }
                    permit = pool.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break 'pages,
                    },
                };

                let candidate = ImageCandidate {
                    image_url,
                    page_url: page_url.clone(),
                    page_title: extracted.title.clone(),
                };
                let downloader = downloader.clone();
                let tally = tally.clone();
                let cancel = cancel.clone();
                let max_images = request.max_images;
                workers.spawn(async move {
                    let _permit = permit;
                    if cancel.is_cancelled() || tally.downloaded() >= max_images {
                        return;
                    }
                    let outcome = downloader.download(&candidate).await;
                    tally.record(outcome);
                });

                reap(&mut workers);
            }

            for link in extracted.links.into_iter().take(self.config.links_per_page) {
                if same_host(&link, &crawl_base) {
                    frontier.push(&link);
                }
            }
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::warn!(error = %e, "download worker panicked");
            }
        }

        let summary = CrawlSummary {
            start_url: start.to_string(),
            pages_visited: frontier.visited(),
            images_found,
            images_downloaded: tally.downloaded(),
            images_failed: tally.failed.load(Ordering::SeqCst),
            skipped: tally.skipped(),
            errors: tally.errors(),
            cancelled,
            started_at,
            finished_at: Utc::now(),
        };

        tracing::info!(
            url = %summary.start_url,
            pages = summary.pages_visited,
            found = summary.images_found,
            downloaded = summary.images_downloaded,
            failed = summary.images_failed,
            cancelled = summary.cancelled,
            "crawl finished"
        );
        Ok(summary)
    }
}

fn reap(workers: &mut JoinSet<()>) {
    while let Some(joined) = workers.try_join_next() {
        if let Err(e) = joined {
            tracing::warn!(error = %e, "download worker panicked");
        }
    }
}

/// Counters shared between the traversal task and download workers.
struct Tally {
    downloaded: AtomicUsize,
    failed: AtomicUsize,
    duplicate: AtomicUsize,
    too_small: AtomicUsize,
    not_image: AtomicUsize,
    errors: Mutex<VecDeque<String>>,
    max_errors: usize,
}

impl Tally {
    fn new(max_errors: usize) -> Self {
        Self {
            downloaded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            duplicate: AtomicUsize::new(0),
            too_small: AtomicUsize::new(0),
            not_image: AtomicUsize::new(0),
            errors: Mutex::new(VecDeque::new()),
            max_errors,
        }
    }

    fn downloaded(&self) -> usize {
        self.downloaded.load(Ordering::SeqCst)
    }

    fn record(&self, outcome: DownloadOutcome) {
        match outcome {
            DownloadOutcome::Stored(_) => {
                self.downloaded.fetch_add(1, Ordering::SeqCst);
            }
            DownloadOutcome::SkippedDuplicate => {
                self.duplicate.fetch_add(1, Ordering::Relaxed);
            }
            DownloadOutcome::SkippedTooSmall => {
                self.too_small.fetch_add(1, Ordering::Relaxed);
            }
            DownloadOutcome::SkippedNotImage => {
                self.not_image.fetch_add(1, Ordering::Relaxed);
            }
            DownloadOutcome::Failed(reason) => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                self.push_error(reason);
            }
        }
    }

    /// Keep only the most recent `max_errors` messages.
    fn push_error(&self, message: String) {
        if self.max_errors == 0 {
            return;
        }
        if let Ok(mut errors) = self.errors.lock() {
            if errors.len() >= self.max_errors {
                errors.pop_front();
            }
            errors.push_back(message);
        }
    }

    fn errors(&self) -> Vec<String> {
        self.errors
            .lock()
            .map(|errors| errors.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn skipped(&self) -> SkipCounts {
        SkipCounts {
            duplicate: self.duplicate.load(Ordering::Relaxed),
            too_small: self.too_small.load(Ordering::Relaxed),
            not_image: self.not_image.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_bad_start_urls() {
        for bad in ["", "not a url", "ftp://example.com/", "file:///etc/passwd"] {
            let err = CrawlRequest::new(bad).validate().unwrap_err();
            assert!(matches!(err, ScoutError::InvalidInput(_)), "{bad}");
        }
        assert!(CrawlRequest::new("https://example.com/").validate().is_ok());
    }

    #[test]
    fn test_error_log_keeps_most_recent() {
        let tally = Tally::new(3);
        for i in 0..5 {
            tally.push_error(format!("e{i}"));
        }
        assert_eq!(tally.errors(), vec!["e2", "e3", "e4"]);
    }

    #[test]
    fn test_tally_counts_outcomes() {
        let tally = Tally::new(10);
        tally.record(DownloadOutcome::SkippedDuplicate);
        tally.record(DownloadOutcome::SkippedTooSmall);
        tally.record(DownloadOutcome::Failed("boom".to_string()));
        assert_eq!(tally.downloaded(), 0);
        assert_eq!(tally.failed.load(Ordering::SeqCst), 1);
        assert_eq!(
            tally.skipped(),
            SkipCounts {
                duplicate: 1,
                too_small: 1,
                not_image: 0
            }
        );
        assert_eq!(tally.errors(), vec!["boom"]);
    }
}
