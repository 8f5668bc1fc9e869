//! Soft-404 detection
//!
//! Some servers answer missing pages with `200 OK` and a friendly "not found"
//! page. The detector flags those responses from the page title and visible
//! body text, using configurable indicators.

mod indicator;

pub use indicator::Indicator;

use crate::config::Soft404Config;
use scraper::{Html, Node};
use thiserror::Error;

/// Errors raised while building a detector
#[derive(Debug, Error)]
pub enum Soft404Error {
    #[error("Invalid soft-404 indicator '{indicator}': {source}")]
    InvalidIndicator {
        indicator: String,
        #[source]
        source: regex::Error,
    },
}

/// Outcome of evaluating one response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Soft404Verdict {
    /// The page should be treated as missing
    pub flagged: bool,

    /// Visible text is shorter than the configured minimum
    pub thin_content: bool,

    /// First indicator that matched, if any
    pub matched: Option<String>,

    /// Ignore pattern that overrode a match, if any
    pub ignored_by: Option<String>,
}

/// Detects disguised "not found" pages
#[derive(Debug, Clone)]
pub struct Soft404Detector {
    enabled: bool,
    min_length: usize,
    title_indicators: Vec<Indicator>,
    body_indicators: Vec<Indicator>,
    ignore_patterns: Vec<Indicator>,
}

impl Soft404Detector {
    /// Builds a detector, compiling regex indicators once
    pub fn from_config(config: &Soft404Config) -> Result<Self, Soft404Error> {
        Ok(Self {
            enabled: config.enabled,
            min_length: config.min_length,
            title_indicators: parse_all(&config.title_indicators)?,
            body_indicators: parse_all(&config.body_indicators)?,
            ignore_patterns: parse_all(&config.ignore_patterns)?,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns true if the page looks like a soft 404
    ///
    /// # Arguments
    ///
    /// * `title` - Page title (may be empty)
    /// * `body` - Response body; markup is stripped before matching
    pub fn looks_like_soft_404(&self, title: &str, body: &str) -> bool {
        self.evaluate(title, body).flagged
    }

    /// Evaluates a page and explains the decision
    pub fn evaluate(&self, title: &str, body: &str) -> Soft404Verdict {
        if !self.enabled {
            return Soft404Verdict::default();
        }

        let title = collapse_whitespace(title);
        let text = visible_text(body);
        let thin_content = text.chars().count() < self.min_length;

        let matched = first_match(&self.title_indicators, &title)
            .or_else(|| first_match(&self.body_indicators, &text));

        let Some(matched) = matched else {
            return Soft404Verdict {
                thin_content,
                ..Soft404Verdict::default()
            };
        };

        let ignored_by = first_match(&self.ignore_patterns, &title)
            .or_else(|| first_match(&self.ignore_patterns, &text));

        Soft404Verdict {
            flagged: ignored_by.is_none(),
            thin_content,
            matched: Some(matched),
            ignored_by,
        }
    }
}

fn parse_all(raw: &[String]) -> Result<Vec<Indicator>, Soft404Error> {
    raw.iter().map(|r| Indicator::parse(r)).collect()
}

fn first_match(indicators: &[Indicator], text: &str) -> Option<String> {
    if text.is_empty() {
        return None;
    }
    indicators
        .iter()
        .find(|i| i.matches(text))
        .map(Indicator::describe)
}

/// Extracts visible text from HTML, skipping script and style content
pub fn visible_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut text = String::new();

    for node in document.tree.root().descendants() {
        let Node::Text(chunk) = node.value() else {
            continue;
        };

        let hidden = node.ancestors().any(|ancestor| {
            matches!(
                ancestor.value(),
                Node::Element(e) if matches!(e.name(), "script" | "style" | "noscript" | "template")
            )
        });

        if !hidden {
            text.push_str(chunk);
            text.push(' ');
        }
    }

    collapse_whitespace(&text)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> Soft404Detector {
        Soft404Detector::from_config(&Soft404Config::default()).unwrap()
    }

    #[test]
    fn test_title_indicator_flags_page() {
        let d = detector();
        assert!(d.looks_like_soft_404("Page Not Found - My Blog", "<p>Sorry.</p>"));
    }

    #[test]
    fn test_body_regex_indicator_flags_page() {
        let d = detector();
        let body = "<html><body><h1>Error 404</h1><p>We looked everywhere.</p></body></html>";
        let verdict = d.evaluate("My Blog", body);
        assert!(verdict.flagged);
        assert_eq!(verdict.matched.as_deref(), Some("/error\\s*404/"));
        assert!(verdict.thin_content);
    }

    #[test]
    fn test_thin_content_alone_is_not_flagged() {
        let d = detector();
        let verdict = d.evaluate("Contact", "<p>Call us.</p>");
        assert!(verdict.thin_content);
        assert!(!verdict.flagged);
    }

    #[test]
    fn test_script_text_is_ignored() {
        let d = detector();
        let body = r#"<html><head><script>var msg = "page not found";</script>
            <style>.not-found { color: red }</style></head>
            <body><p>Welcome to the article.</p></body></html>"#;
        assert!(!d.looks_like_soft_404("Article", body));
    }

    #[test]
    fn test_ignore_patterns_override() {
        let config = Soft404Config {
            ignore_patterns: vec!["/how to fix a 404/i".to_string()],
            ..Soft404Config::default()
        };
        let d = Soft404Detector::from_config(&config).unwrap();

        let verdict = d.evaluate("How to fix a 404 page not found error", "<p>Guide</p>");
        assert!(!verdict.flagged);
        assert!(verdict.matched.is_some());
        assert!(verdict.ignored_by.is_some());
    }

    #[test]
    fn test_disabled_detector_never_flags() {
        let config = Soft404Config {
            enabled: false,
            ..Soft404Config::default()
        };
        let d = Soft404Detector::from_config(&config).unwrap();
        assert!(!d.looks_like_soft_404("404 Not Found", "page not found"));
    }

    #[test]
    fn test_invalid_regex_fails_build() {
        let config = Soft404Config {
            body_indicators: vec!["/[unterminated/".to_string()],
            ..Soft404Config::default()
        };
        assert!(matches!(
            Soft404Detector::from_config(&config),
            Err(Soft404Error::InvalidIndicator { .. })
        ));
    }

    #[test]
    fn test_visible_text_collapses_whitespace() {
        let text = visible_text("<div>  Hello\n\n   <b>world</b> </div>");
        assert_eq!(text, "Hello world");
    }
}
