//! A reference environment keeping records in memory.
//!
//! Used by tests and demos; production hosts supply their own
//! [`Environment`](crate::Environment).

mod environment;
mod network;
mod store;

pub use environment::MemoryEnvironment;
pub use network::{FnNetwork, Network, QueuedNetwork, RecordedRequest};
pub use store::{ConnectionPage, ReadResult, Record, RecordStore};
