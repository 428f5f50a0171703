//! # Storage Module
//!
//! Port traits consumed by the domain layer plus in-memory adapters.
//!
//! The concrete persistence technology is owned by the host application.
//! The in-memory adapters are complete implementations of the ports and are
//! suitable for single-process deployments, demos and tests.

pub mod memory;
pub mod traits;

pub use memory::{InMemoryAttendeeStore, InMemoryLedger};
pub use traits::{AttendeeStore, LedgerError, TransactionLedger};
