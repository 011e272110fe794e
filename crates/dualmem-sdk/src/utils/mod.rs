//! SDK Utilities
//!
//! Common utilities for the SDK.

mod hashing;
mod time;

pub use hashing::content_hash;
pub use time::{age_days, elapsed_ms};
