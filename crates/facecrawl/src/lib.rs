//! facecrawl: domain-bounded image crawling, content dedup, and face-geometry similarity search.

pub mod catalog;
pub mod config;
pub mod crawler;
pub mod dedup;
pub mod detector;
pub mod download;
pub mod extract;
pub mod fetch;
pub mod index;
pub mod search;
pub mod types;

pub use catalog::{Catalog, MetadataSink};
pub use config::{CrawlConfig, SearchConfig};
pub use crawler::{CrawlRequest, Crawler};
pub use dedup::{content_hash, normalize_page_url, ContentDedup, Frontier};
pub use detector::{FaceDetector, ScrfdDetector};
pub use download::{Downloader, ImageCandidate};
pub use extract::{extract, Extracted};
pub use fetch::{FetchError, FetchedBody, HttpFetcher, PageFetcher};
pub use index::{FaceIndex, IngestReport};
pub use search::{rank_matches, representative_face, FaceSearch};
pub use types::*;
