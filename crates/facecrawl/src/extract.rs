//! Link and image extraction from raw HTML.
//!
//! Parses one document with `scraper` and returns same-host links and
//! candidate image URLs, both resolved against the page URL and kept in
//! document order. Link order drives the crawl's breadth-first order.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

/// Attributes checked on `<img>`, highest priority first.
const IMAGE_ATTRS: [&str; 6] = [
    "src",
    "data-src",
    "data-lazy-src",
    "data-original",
    "data-srcset",
    "srcset",
];

/// Page titles longer than this are truncated.
const MAX_TITLE_CHARS: usize = 200;

static LINK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("static selector"));
static IMG_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("img").expect("static selector"));
static STYLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("[style]").expect("static selector"));
static TITLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("static selector"));
static CSS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"url\(\s*['"]?([^'")\s]+)['"]?\s*\)"#).expect("static regex")
});

/// Everything the crawler needs from one page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extracted {
    pub title: Option<String>,
    /// Same-host http(s) links, fragment removed, first occurrence order.
    pub links: Vec<Url>,
    /// Candidate image URLs, `<img>` elements first, then inline style backgrounds.
    pub images: Vec<Url>,
}

/// Extract links, images, and title from an HTML document.
///
/// Never fails: malformed markup yields whatever the parser recovers, and
/// unresolvable URLs are dropped individually.
pub fn extract(page_url: &Url, html: &[u8]) -> Extracted {
    let text = String::from_utf8_lossy(html);
    let document = Html::parse_document(&text);

    Extracted {
        title: extract_title(&document),
        links: extract_links(&document, page_url),
        images: extract_images(&document, page_url),
    }
}

fn extract_title(document: &Html) -> Option<String> {
    let title = document
        .select(&TITLE_SEL)
        .next()?
        .text()
        .collect::<String>();
    let title = title.split_whitespace().collect::<Vec<_>>().join(" ");
    if title.is_empty() {
        return None;
    }
    Some(title.chars().take(MAX_TITLE_CHARS).collect())
}

fn extract_links(document: &Html, page_url: &Url) -> Vec<Url> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for element in document.select(&LINK_SEL) {
        let href = element.value().attr("href").unwrap_or("").trim();
        if href.is_empty() || href.starts_with('#') {
            continue;
        }
        let Ok(mut resolved) = page_url.join(href) else {
            continue;
        };
        if !is_http(&resolved) || !same_host(&resolved, page_url) {
            continue;
        }
        resolved.set_fragment(None);
        if seen.insert(resolved.as_str().to_string()) {
            links.push(resolved);
        }
    }

    links
}

fn extract_images(document: &Html, page_url: &Url) -> Vec<Url> {
    let mut seen = HashSet::new();
    let mut images = Vec::new();
    let mut push = |raw: &str| {
        if let Some(url) = resolve_image(page_url, raw) {
            if seen.insert(url.as_str().to_string()) {
                images.push(url);
            }
        }
    };

    for element in document.select(&IMG_SEL) {
        let attrs = element.value();
        let chosen = IMAGE_ATTRS.iter().find_map(|name| {
            let value = attrs.attr(name)?.trim();
            if value.is_empty() {
                return None;
            }
            if name.ends_with("srcset") {
                first_srcset_candidate(value)
            } else {
                Some(value)
            }
        });
        if let Some(raw) = chosen {
            push(raw);
        }
    }

    for element in document.select(&STYLE_SEL) {
        let style = element.value().attr("style").unwrap_or("");
        for caps in CSS_URL.captures_iter(style) {
            push(&caps[1]);
        }
    }

    images
}

/// `a.jpg 1x, b.jpg 2x` -> `a.jpg`.
fn first_srcset_candidate(srcset: &str) -> Option<&str> {
    srcset
        .split(',')
        .next()?
        .split_whitespace()
        .next()
        .filter(|s| !s.is_empty())
}

fn resolve_image(page_url: &Url, raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with("data:") {
        return None;
    }
    let url = page_url.join(raw).ok()?;
    if !is_http(&url) || url.path().to_ascii_lowercase().ends_with(".svg") {
        return None;
    }
    Some(url)
}

fn is_http(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

/// Host comparison used for domain bounding.
pub(crate) fn same_host(a: &Url, b: &Url) -> bool {
    match (a.host_str(), b.host_str()) {
        (Some(x), Some(y)) => x.eq_ignore_ascii_case(y),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> Url {
        Url::parse("https://example.com/gallery/index.html").unwrap()
    }

    #[test]
    fn test_links_are_same_host_and_ordered() {
        let html = br##"
            <a href="/b">B</a>
            <a href="https://other.org/x">X</a>
            <a href="c.html#top">C</a>
            <a href="/b">B again</a>
            <a href="#section">anchor</a>
            <a href="mailto:me@example.com">mail</a>
        "##;
        let out = extract(&page(), html);
        let links: Vec<&str> = out.links.iter().map(|u| u.as_str()).collect();
        assert_eq!(
            links,
            vec![
                "https://example.com/b",
                "https://example.com/gallery/c.html"
            ]
        );
    }

    #[test]
    fn test_image_attribute_priority() {
        let html = br#"
            <img src="" data-src="/lazy.jpg" data-original="/orig.jpg">
            <img data-lazy-src="/lazier.png">
            <img srcset="/small.jpg 1x, /big.jpg 2x">
            <img data-srcset="https://cdn.example.com/a.webp 480w, /b.webp 800w" src="">
        "#;
        let out = extract(&page(), html);
        let images: Vec<&str> = out.images.iter().map(|u| u.as_str()).collect();
        assert_eq!(
            images,
            vec![
                "https://example.com/lazy.jpg",
                "https://example.com/lazier.png",
                "https://example.com/small.jpg",
                "https://cdn.example.com/a.webp",
            ]
        );
    }

    #[test]
    fn test_svg_and_non_http_images_excluded() {
        let html = br#"
            <img src="/vector.SVG">
            <img src="data:image/png;base64,AAAA">
            <img src="ftp://example.com/a.jpg">
            <img src="photo.jpg">
        "#;
        let out = extract(&page(), html);
        assert_eq!(out.images.len(), 1);
        assert_eq!(
            out.images[0].as_str(),
            "https://example.com/gallery/photo.jpg"
        );
    }

    #[test]
    fn test_style_backgrounds_follow_img_elements() {
        let html = br#"
            <div style="background-image: url('/hero.jpg')"></div>
            <img src="/first.jpg">
            <img src="/hero.jpg">
        "#;
        let out = extract(&page(), html);
        let images: Vec<&str> = out.images.iter().map(|u| u.as_str()).collect();
        assert_eq!(
            images,
            vec!["https://example.com/first.jpg", "https://example.com/hero.jpg"]
        );
    }

    #[test]
    fn test_title_is_collapsed_and_truncated() {
        let long = "x".repeat(300);
        let html = format!("<html><head><title>  Hello\n  {long} </title></head></html>");
        let out = extract(&page(), html.as_bytes());
        let title = out.title.unwrap();
        assert!(title.starts_with("Hello x"));
        assert_eq!(title.chars().count(), MAX_TITLE_CHARS);
    }

    #[test]
    fn test_malformed_html_does_not_panic() {
        let out = extract(&page(), b"<a href='/ok'><img src='/i.jpg'<<<>>");
        assert!(out.title.is_none());
        assert_eq!(out.links.len(), 1);
    }

    #[test]
    fn test_first_srcset_candidate() {
        assert_eq!(first_srcset_candidate("a.jpg 1x, b.jpg 2x"), Some("a.jpg"));
        assert_eq!(first_srcset_candidate("  "), None);
    }
}
