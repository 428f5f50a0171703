//! # In-Memory Storage
//!
//! Map-backed implementations of the storage ports. Every operation runs
//! under a single lock, which makes `add_count` a true atomic increment.

pub mod attendee_store;
pub mod ledger;

#[cfg(test)]
pub mod test_utils;

pub use attendee_store::InMemoryAttendeeStore;
pub use ledger::InMemoryLedger;
