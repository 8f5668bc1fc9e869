//! Candidate extraction from content HTML
//!
//! Collects the links and images of a content item in document order:
//! - `<a href="...">` as links
//! - `<img src="...">` as images
//!
//! `javascript:`, `mailto:`, `tel:`, `data:` and fragment-only references are
//! skipped; they never point at something that can go missing.

use crate::queue::ContentItem;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of reference a candidate is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateKind {
    Link,
    Image,
}

impl CandidateKind {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Link => "link",
            Self::Image => "image",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "link" => Some(Self::Link),
            "image" => Some(Self::Image),
            _ => None,
        }
    }
}

impl fmt::Display for CandidateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// One reference found in a content item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub raw_url: String,
    pub source_item_id: i64,
    /// Position among the item's kept candidates, starting at 0
    pub occurrence_index: u32,
    pub kind: CandidateKind,
}

/// Extracts link and image candidates from a content item
///
/// # Arguments
///
/// * `item` - The content item whose body is parsed
/// * `links` - Collect `<a href>` references
/// * `images` - Collect `<img src>` references
pub fn extract_candidates(item: &ContentItem, links: bool, images: bool) -> Vec<Candidate> {
    let Ok(selector) = Selector::parse("a[href], img[src]") else {
        return Vec::new();
    };

    let document = Html::parse_fragment(&item.body_html);
    let mut candidates = Vec::new();

    for element in document.select(&selector) {
        let (kind, attr) = match element.value().name() {
            "a" => (CandidateKind::Link, "href"),
            "img" => (CandidateKind::Image, "src"),
            _ => continue,
        };

        match kind {
            CandidateKind::Link if !links => continue,
            CandidateKind::Image if !images => continue,
            _ => {}
        }

        let Some(raw) = element.value().attr(attr).map(str::trim) else {
            continue;
        };
        if !is_checkable(raw) {
            continue;
        }

        candidates.push(Candidate {
            raw_url: raw.to_string(),
            source_item_id: item.id,
            occurrence_index: candidates.len() as u32,
            kind,
        });
    }

    candidates
}

/// Returns false for references that have nothing to probe
fn is_checkable(raw: &str) -> bool {
    if raw.is_empty() || raw.starts_with('#') {
        return false;
    }

    let lower = raw.to_ascii_lowercase();
    !["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
}

/// Extracts the `<title>` of an HTML document
pub fn extract_title(html: &str) -> Option<String> {
    let title_selector = Selector::parse("title").ok()?;
    let document = Html::parse_document(html);

    document
        .select(&title_selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn item(body: &str) -> ContentItem {
        ContentItem {
            id: 42,
            title: "Post".to_string(),
            body_html: body.to_string(),
            modified_at: Utc::now(),
            content_type: "post".to_string(),
            status: "publish".to_string(),
            permalink: None,
        }
    }

    #[test]
    fn test_document_order_and_indices() {
        let body = r#"
            <p><a href="https://a.example/">A</a></p>
            <img src="/wp-content/uploads/x.png">
            <a href="/about">About</a>
        "#;
        let candidates = extract_candidates(&item(body), true, true);

        let summary: Vec<(&str, CandidateKind, u32)> = candidates
            .iter()
            .map(|c| (c.raw_url.as_str(), c.kind, c.occurrence_index))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("https://a.example/", CandidateKind::Link, 0),
                ("/wp-content/uploads/x.png", CandidateKind::Image, 1),
                ("/about", CandidateKind::Link, 2),
            ]
        );
        assert!(candidates.iter().all(|c| c.source_item_id == 42));
    }

    #[test]
    fn test_skips_uncheckable_references() {
        let body = r##"
            <a href="javascript:void(0)">js</a>
            <a href="MAILTO:me@example.com">mail</a>
            <a href="tel:+123">call</a>
            <a href="#top">top</a>
            <a href="   ">blank</a>
            <img src="data:image/png;base64,AAAA">
            <a href="/kept">kept</a>
        "##;
        let candidates = extract_candidates(&item(body), true, true);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].raw_url, "/kept");
        assert_eq!(candidates[0].occurrence_index, 0);
    }

    #[test]
    fn test_kind_filters() {
        let body = r#"<a href="/a">a</a><img src="/i.png">"#;

        let links = extract_candidates(&item(body), true, false);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].kind, CandidateKind::Link);

        let images = extract_candidates(&item(body), false, true);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].kind, CandidateKind::Image);
    }

    #[test]
    fn test_extract_title() {
        assert_eq!(
            extract_title("<html><head><title> Not Found </title></head></html>"),
            Some("Not Found".to_string())
        );
        assert_eq!(extract_title("<p>no title</p>"), None);
    }
}
