//! Scan orchestrator
//!
//! Guards the scan loop with an exclusive lock, defers batches during the rest
//! window or under server load, and hands cleared batches to the caller.

mod controller;
mod lock;
mod preflight;

pub use controller::{InvocationOutcome, Orchestrator, RescheduleReason, ScanRun};
pub use lock::{new_token, LockManager, LockPrimitive, MemoryLock, ScanLock};
pub use preflight::{
    normalize_hour, LoadProbe, Preflight, ProcLoadAvg, RestWindow, SiteTimezone, StaticLoad,
    Trigger,
};
