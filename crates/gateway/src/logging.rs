//! Asynchronous request-log ingestion and key-touch batching.
//!
//! Log submission never blocks a response: entries go into a bounded
//! in-memory queue that drops its oldest entry under pressure, and worker
//! tasks flush batches to the store. Key touches are collected in a set and
//! flushed on a ticker, collapsing duplicates within the interval.

mod last_used;
mod logger;

pub use last_used::LastUsedTracker;
pub use logger::{LogHandle, RequestLogger};
