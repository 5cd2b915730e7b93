//! Resilient external calls
//!
//! Classified retry with bounded exponential backoff. Transient failures are retried and
//! invisible to callers unless attempts run out; fatal failures return immediately.

mod client;
mod policy;

pub use client::ResilientClient;
pub use policy::{CallOutcome, Classify, ClassifiedError, RetryPolicy, call_with_retry};
