/// Classification recorded for each checked link or image
///
/// This module defines every verdict a candidate URL can end up with after a scan.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents the outcome of checking one link or image occurrence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    // ===== Healthy =====
    /// Target answered with a 2xx/3xx status, or the local file exists
    Alive,

    // ===== Findings =====
    /// Target answered 4xx/5xx or could not be reached
    Broken,

    /// Target answered 200 but the content looks like a "not found" page
    #[serde(rename = "soft_404")]
    Soft404,

    /// Resolved to a local upload that is not on disk
    MissingFile,

    // ===== Not Checked =====
    /// URL was refused by the host policy or path checks
    Rejected,

    /// Still failing with a temporary status after every retry
    Unknown,
}

impl LinkStatus {
    /// Returns true if this status should be reported to editors
    pub fn is_finding(&self) -> bool {
        matches!(self, Self::Broken | Self::Soft404 | Self::MissingFile)
    }

    /// Returns true if the target was reached and looked fine
    pub fn is_alive(&self) -> bool {
        matches!(self, Self::Alive)
    }

    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Alive => "alive",
            Self::Broken => "broken",
            Self::Soft404 => "soft_404",
            Self::MissingFile => "missing_file",
            Self::Rejected => "rejected",
            Self::Unknown => "unknown",
        }
    }

    /// Parses a status from its database string representation
    ///
    /// Returns None if the string doesn't match any known status.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "alive" => Some(Self::Alive),
            "broken" => Some(Self::Broken),
            "soft_404" => Some(Self::Soft404),
            "missing_file" => Some(Self::MissingFile),
            "rejected" => Some(Self::Rejected),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Returns all possible link statuses
    pub fn all_statuses() -> Vec<Self> {
        vec![
            Self::Alive,
            Self::Broken,
            Self::Soft404,
            Self::MissingFile,
            Self::Rejected,
            Self::Unknown,
        ]
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_finding() {
        assert!(LinkStatus::Broken.is_finding());
        assert!(LinkStatus::Soft404.is_finding());
        assert!(LinkStatus::MissingFile.is_finding());

        assert!(!LinkStatus::Alive.is_finding());
        assert!(!LinkStatus::Rejected.is_finding());
        assert!(!LinkStatus::Unknown.is_finding());
    }

    #[test]
    fn test_roundtrip_db_string() {
        for status in LinkStatus::all_statuses() {
            let db_str = status.to_db_string();
            assert_eq!(
                Some(status),
                LinkStatus::from_db_string(db_str),
                "Failed roundtrip for {:?}",
                status
            );
        }
        assert_eq!(LinkStatus::from_db_string("invalid"), None);
    }

    #[test]
    fn test_serde_matches_db_string() {
        for status in LinkStatus::all_statuses() {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.to_db_string()));
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", LinkStatus::MissingFile), "missing_file");
        assert_eq!(format!("{}", LinkStatus::Soft404), "soft_404");
    }
}
