//! Turns fetched HTML into the navigable page data the audit engine
//! consumes: document metadata, headings, word count, extracted links
//! (with anchor text and nofollow flag) and images.
//!
//! Parsing happens once per page; rules read the extracted data and never
//! touch the raw DOM. All selectors are cached.

use std::sync::OnceLock;

use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heading {
    pub level: u8,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageLink {
    /// Resolved absolute URL where possible, raw href otherwise.
    pub href: String,
    pub text: String,
    pub nofollow: bool,
    pub is_internal: bool,
    /// The href as written in the document, before resolution.
    pub raw_href: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageImage {
    pub src: String,
    pub alt: Option<String>,
}

/// Everything the rules need from one parsed document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageData {
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub meta_keywords: Option<String>,
    pub canonical_url: Option<String>,
    pub robots_meta: Option<String>,
    pub viewport: Option<String>,
    pub lang: Option<String>,
    pub headings: Vec<Heading>,
    pub word_count: usize,
    pub links: Vec<PageLink>,
    pub images: Vec<PageImage>,
    pub has_structured_data: bool,
}

impl PageData {
    pub fn parse(html: &str, base_url: &Url) -> Self {
        let document = Html::parse_document(html);

        Self {
            title: extract_title(&document),
            meta_description: extract_meta(&document, meta_description_selector()),
            meta_keywords: extract_meta(&document, meta_keywords_selector()),
            canonical_url: extract_canonical(&document),
            robots_meta: extract_meta(&document, robots_meta_selector()),
            viewport: extract_meta(&document, viewport_selector()),
            lang: extract_lang(&document),
            headings: extract_headings(&document),
            word_count: extract_word_count(&document),
            links: extract_links(&document, base_url),
            images: extract_images(&document),
            has_structured_data: check_structured_data(&document),
        }
    }

    pub fn heading_count(&self, level: u8) -> usize {
        self.headings.iter().filter(|h| h.level == level).count()
    }

    pub fn internal_links(&self) -> impl Iterator<Item = &PageLink> {
        self.links.iter().filter(|l| l.is_internal)
    }

    pub fn images_without_alt(&self) -> usize {
        self.images
            .iter()
            .filter(|i| i.alt.as_deref().map(str::trim).map_or(true, str::is_empty))
            .count()
    }
}

fn meta_description_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    SELECTOR.get_or_init(|| Selector::parse("meta[name='description']").unwrap())
}

fn meta_keywords_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    SELECTOR.get_or_init(|| Selector::parse("meta[name='keywords']").unwrap())
}

fn robots_meta_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    SELECTOR.get_or_init(|| Selector::parse("meta[name='robots']").unwrap())
}

fn viewport_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    SELECTOR.get_or_init(|| Selector::parse("meta[name='viewport']").unwrap())
}

fn extract_title(document: &Html) -> Option<String> {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    let selector = SELECTOR.get_or_init(|| Selector::parse("title").unwrap());
    document
        .select(selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn extract_meta(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn extract_canonical(document: &Html) -> Option<String> {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    let selector = SELECTOR.get_or_init(|| Selector::parse("link[rel='canonical']").unwrap());
    document
        .select(selector)
        .next()
        .and_then(|el| el.value().attr("href"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn extract_lang(document: &Html) -> Option<String> {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    let selector = SELECTOR.get_or_init(|| Selector::parse("html").unwrap());
    document
        .select(selector)
        .next()
        .and_then(|el| el.value().attr("lang"))
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
}

fn extract_headings(document: &Html) -> Vec<Heading> {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    let selector = SELECTOR.get_or_init(|| Selector::parse("h1, h2, h3, h4, h5, h6").unwrap());

    document
        .select(selector)
        .filter_map(|el| {
            let level = el.value().name().strip_prefix('h')?.parse().ok()?;
            Some(Heading {
                level,
                text: el.text().collect::<Vec<_>>().join(" ").trim().to_string(),
            })
        })
        .collect()
}

fn extract_word_count(document: &Html) -> usize {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    let selector = SELECTOR.get_or_init(|| Selector::parse("body").unwrap());
    document
        .select(selector)
        .next()
        .map(|body| body.text().collect::<String>().split_whitespace().count())
        .unwrap_or(0)
}

fn extract_links(document: &Html, base_url: &Url) -> Vec<PageLink> {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    let selector = SELECTOR.get_or_init(|| Selector::parse("a[href]").unwrap());

    let mut links = Vec::new();
    for element in document.select(selector) {
        let Some(raw) = element.value().attr("href") else {
            continue;
        };
        let raw = raw.trim();
        if raw.is_empty()
            || raw.starts_with('#')
            || raw.starts_with("javascript:")
            || raw.starts_with("mailto:")
            || raw.starts_with("tel:")
        {
            continue;
        }

        let resolved = match base_url.join(raw) {
            Ok(mut u) => {
                u.set_fragment(None);
                Some(u)
            }
            Err(_) => None,
        };

        let is_internal = resolved
            .as_ref()
            .map(|u| u.host_str() == base_url.host_str() && u.port() == base_url.port())
            .unwrap_or(false);

        let nofollow = element
            .value()
            .attr("rel")
            .map(|rel| rel.split_whitespace().any(|t| t.eq_ignore_ascii_case("nofollow")))
            .unwrap_or(false);

        links.push(PageLink {
            href: resolved.map(|u| u.to_string()).unwrap_or_else(|| raw.to_string()),
            text: element.text().collect::<Vec<_>>().join(" ").trim().to_string(),
            nofollow,
            is_internal,
            raw_href: raw.to_string(),
        });
    }
    links
}

fn extract_images(document: &Html) -> Vec<PageImage> {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    let selector = SELECTOR.get_or_init(|| Selector::parse("img").unwrap());

    document
        .select(selector)
        .filter_map(|img| {
            img.value().attr("src").map(|src| PageImage {
                src: src.to_string(),
                alt: img.value().attr("alt").map(|s| s.to_string()),
            })
        })
        .collect()
}

fn check_structured_data(document: &Html) -> bool {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    let selector =
        SELECTOR.get_or_init(|| Selector::parse("script[type='application/ld+json']").unwrap());
    document.select(selector).next().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/").unwrap()
    }

    #[test]
    fn test_parse_basic_page() {
        let html = r#"
            <html lang="en">
                <head>
                    <title>Test Page</title>
                    <meta name="description" content="A test page description.">
                    <meta name="viewport" content="width=device-width, initial-scale=1">
                    <link rel="canonical" href="https://example.com/">
                </head>
                <body>
                    <h1>Hello</h1>
                    <h2>Sub</h2>
                    <img src="test.jpg" alt="test">
                    <img src="missing.jpg">
                    <a href="/link">Link</a>
                    <a href="https://external.com">External</a>
                </body>
            </html>
        "#;
        let page = PageData::parse(html, &base());

        assert_eq!(page.title.as_deref(), Some("Test Page"));
        assert_eq!(page.meta_description.as_deref(), Some("A test page description."));
        assert_eq!(page.lang.as_deref(), Some("en"));
        assert_eq!(page.heading_count(1), 1);
        assert_eq!(page.heading_count(2), 1);
        assert_eq!(page.images.len(), 2);
        assert_eq!(page.images_without_alt(), 1);
        assert_eq!(page.links.len(), 2);
        assert_eq!(page.internal_links().count(), 1);
    }

    #[test]
    fn test_links_resolved_and_filtered() {
        let html = r##"
            <html><body>
                <a href="/relative">Relative</a>
                <a href="#fragment">Fragment only</a>
                <a href="/page#section">With fragment</a>
                <a href="javascript:void(0)">JS</a>
                <a href="mailto:a@b.c">Mail</a>
                <a href="https://other.com/x" rel="nofollow noopener">Off-site</a>
            </body></html>
        "##;
        let page = PageData::parse(html, &base());

        let hrefs: Vec<&str> = page.links.iter().map(|l| l.href.as_str()).collect();
        assert_eq!(
            hrefs,
            vec![
                "https://example.com/relative",
                "https://example.com/page",
                "https://other.com/x",
            ]
        );
        assert!(page.links[2].nofollow);
        assert!(!page.links[2].is_internal);
    }

    #[test]
    fn test_empty_alt_counts_as_missing() {
        let html = r#"<html><body><img src="a.jpg" alt="   "></body></html>"#;
        let page = PageData::parse(html, &base());
        assert_eq!(page.images_without_alt(), 1);
    }

    #[test]
    fn test_structured_data_detection() {
        let html = r#"<html><head>
            <script type="application/ld+json">{"@type":"Organization"}</script>
        </head><body></body></html>"#;
        assert!(PageData::parse(html, &base()).has_structured_data);
        assert!(!PageData::parse("<html></html>", &base()).has_structured_data);
    }
}
