//! Tunables for crawl sessions and face search.

use std::time::Duration;

/// Identifying user agent sent with every request.
pub const DEFAULT_USER_AGENT: &str = concat!(
    "Mozilla/5.0 (compatible; facecrawl/",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// Path substrings that mark an image URL as decoration rather than content.
pub const DEFAULT_DENYLIST: [&str; 5] = ["icon", "logo", "sprite", "pixel.gif", "1x1"];

/// Crawl session configuration.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub user_agent: String,
    /// Timeout for a single page fetch.
    pub page_timeout: Duration,
    /// Timeout for a single image fetch.
    pub image_timeout: Duration,
    /// Links examined per page, in document order. Already known links
    /// still use up the allowance.
    pub links_per_page: usize,
    /// Size of the download worker pool.
    pub workers: usize,
    /// Bodies smaller than this are rejected as tracking pixels / placeholders.
    pub min_image_bytes: usize,
    /// Number of most recent errors kept in the summary.
    pub max_errors: usize,
    /// Drop query strings when comparing page URLs. Can merge paginated pages.
    pub strip_query: bool,
    /// Lowercase path substrings that disqualify an image URL.
    pub denylist: Vec<String>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            page_timeout: Duration::from_secs(10),
            image_timeout: Duration::from_secs(15),
            links_per_page: 10,
            workers: 4,
            min_image_bytes: 5 * 1024,
            max_errors: 10,
            strip_query: true,
            denylist: DEFAULT_DENYLIST.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl CrawlConfig {
    /// True if the image URL matches a denylist entry.
    pub fn is_denied(&self, image_url: &str) -> bool {
        let lower = image_url.to_ascii_lowercase();
        self.denylist.iter().any(|needle| lower.contains(needle.as_str()))
    }
}

/// Face search configuration.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Maximum number of ranked matches returned per query.
    pub max_results: usize,
    /// Timeout for running the detector on one image.
    pub detect_timeout: Duration,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: 50,
            detect_timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denylist_matches_case_insensitively() {
        let config = CrawlConfig::default();
        assert!(config.is_denied("https://example.com/static/Site-LOGO.png"));
        assert!(config.is_denied("https://example.com/t/pixel.gif?id=3"));
        assert!(!config.is_denied("https://example.com/photos/beach.jpg"));
    }

    #[test]
    fn test_default_user_agent_identifies_crawler() {
        assert!(CrawlConfig::default().user_agent.contains("facecrawl/"));
    }
}
