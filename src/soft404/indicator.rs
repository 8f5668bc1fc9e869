use crate::soft404::Soft404Error;
use regex::{Regex, RegexBuilder};

/// A single soft-404 indicator
///
/// Indicators written as `/pattern/flags` are compiled once as regular
/// expressions; anything else is a case-insensitive substring.
#[derive(Debug, Clone)]
pub enum Indicator {
    /// Lowercased literal substring
    Literal(String),
    Regex(Regex),
}

impl Indicator {
    /// Parses an indicator from its configured form
    ///
    /// Regex indicators are always case-insensitive. Supported flags are
    /// `i` (implied), `m` (multi-line), `s` (dot matches newline), `x`
    /// (ignore whitespace), `U` (swap greed) and `u` (accepted, no effect).
    /// A value whose trailing segment holds anything else is a literal.
    ///
    /// # Errors
    ///
    /// Returns `Soft404Error::InvalidIndicator` if the regex does not compile.
    pub fn parse(raw: &str) -> Result<Self, Soft404Error> {
        let Some((pattern, flags)) = split_regex_literal(raw) else {
            return Ok(Self::Literal(raw.to_lowercase()));
        };

        let mut builder = RegexBuilder::new(pattern);
        builder.case_insensitive(true);

        for flag in flags.chars() {
            match flag {
                'i' | 'u' => {}
                'm' => {
                    builder.multi_line(true);
                }
                's' => {
                    builder.dot_matches_new_line(true);
                }
                'x' => {
                    builder.ignore_whitespace(true);
                }
                'U' => {
                    builder.swap_greed(true);
                }
                _ => {}
            }
        }

        builder
            .build()
            .map(Self::Regex)
            .map_err(|source| Soft404Error::InvalidIndicator {
                indicator: raw.to_string(),
                source,
            })
    }

    /// Tests the indicator against text
    pub fn matches(&self, text: &str) -> bool {
        match self {
            Self::Literal(needle) => text.to_lowercase().contains(needle.as_str()),
            Self::Regex(re) => re.is_match(text),
        }
    }

    /// Returns the indicator as it would be written in the configuration
    pub fn describe(&self) -> String {
        match self {
            Self::Literal(needle) => needle.clone(),
            Self::Regex(re) => format!("/{}/", re.as_str()),
        }
    }
}

/// Flags accepted after the closing delimiter
const REGEX_FLAGS: &str = "imsxuU";

/// Splits `/pattern/flags` into its parts
///
/// Anything after the last slash that is not a known flag means the value is
/// a path-like literal such as `/foo/bar`.
fn split_regex_literal(raw: &str) -> Option<(&str, &str)> {
    let body = raw.strip_prefix('/')?;
    let end = body.rfind('/')?;
    let (pattern, flags) = (&body[..end], &body[end + 1..]);

    if pattern.is_empty() || !flags.chars().all(|c| REGEX_FLAGS.contains(c)) {
        return None;
    }

    Some((pattern, flags))
}
