//! Shared pieces for redundancy controller binaries.

pub mod logging;

/// Default poll interval, in seconds, used when nothing else is configured.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Default number of consecutive stale polls tolerated before a takeover.
pub const DEFAULT_STALE_POLL_LIMIT: u32 = 4;

/// Collection holding one record per (process name, instance number).
pub const PROCESS_INSTANCES_COLLECTION: &str = "processInstances";

/// Longest accepted poll interval, in seconds.
pub const MAX_POLL_INTERVAL_SECS: u64 = 3600;
