//! State module for scan results and progress
//!
//! # Components
//!
//! - `LinkStatus`: Verdict recorded for each link or image occurrence
//! - `ScanStatus`: Progress snapshot of the running scan, with its `ScanState`

mod link_status;
mod scan_status;

// Re-export main types
pub use link_status::LinkStatus;
pub use scan_status::{ScanState, ScanStatus};
