//! Values that flow through a backup run.
//!
//! Each is created by exactly one stage and consumed by the next; none of
//! them outlives the process.

pub mod archive_key;
pub mod secret_bundle;
pub mod state;
