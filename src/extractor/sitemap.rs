//! Sitemap parsing used to pre-seed the crawl frontier.
//!
//! Both XML sitemaps (`<loc>` entries, including sitemap indexes) and plain
//! text sitemaps (one URL per line) are recognized.

use quick_xml::events::Event;
use url::Url;

pub const SITEMAP_PATH: &str = "sitemap.xml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SitemapFormat {
    Xml,
    PlainText,
}

impl SitemapFormat {
    fn detect(text: &str) -> Self {
        if text.contains("<loc>") {
            SitemapFormat::Xml
        } else {
            SitemapFormat::PlainText
        }
    }
}

/// Extract every URL listed in a sitemap document. Invalid entries are
/// skipped, never fatal.
pub fn parse_sitemap(text: &str) -> Vec<Url> {
    let urls = match SitemapFormat::detect(text) {
        SitemapFormat::Xml => parse_xml_locs(text),
        SitemapFormat::PlainText => text.split_whitespace().map(str::to_string).collect(),
    };

    urls.iter().filter_map(|u| Url::parse(u).ok()).collect()
}

fn parse_xml_locs(text: &str) -> Vec<String> {
    let mut reader = quick_xml::Reader::from_str(text);
    let mut urls = Vec::new();
    let mut buf = Vec::new();
    let mut in_loc = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"loc" => in_loc = true,
            Ok(Event::End(ref e)) if e.name().as_ref() == b"loc" => in_loc = false,
            Ok(Event::Text(e)) if in_loc => match e.decode() {
                Ok(txt) => urls.push(txt.trim().to_string()),
                Err(e) => log::warn!("[SITEMAP] Undecodable <loc> entry: {}", e),
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                log::warn!("[SITEMAP] XML error at byte {}: {}", reader.buffer_position(), e);
                break;
            }
            _ => {}
        }
        buf.clear();
    }
    urls
}
