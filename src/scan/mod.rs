//! Link and image scanning
//!
//! This module turns content items into stored findings:
//! - Extracting link and image candidates from item HTML
//! - Classifying probe outcomes into link statuses
//! - Running whole batches through the orchestrator, dispatcher and storage

mod classify;
mod extract;
mod runner;

pub use classify::{classify_outcome, Classification, FileProbe, FsProbe};
pub use extract::{extract_candidates, extract_title, Candidate, CandidateKind};
pub use runner::{BatchReport, BatchRunner, RunOutcome, RunnerParts, TickReport};
