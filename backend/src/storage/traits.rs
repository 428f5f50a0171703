//! # Storage Traits
//!
//! The ports the registration domain talks to. Each can be implemented
//! against any technology (relational database, remote payment service,
//! in-memory maps) without touching the domain layer.
//!
//! All methods are async. Cancellation is cooperative: the host drops the
//! future (for instance via `tokio::time::timeout`) and implementations must
//! not leave partial writes behind when that happens between awaits.

use anyhow::Result;
use async_trait::async_trait;
use shared::{AttendeeStatus, Count, StatusChange, Transaction};
use thiserror::Error;

use crate::domain::models::attendee::Attendee as DomainAttendee;

/// Failure modes of the external transaction ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The ledger has never seen this debitor. Callers treat this as an
    /// empty transaction history.
    #[error("Debitor {0} not found in ledger")]
    DebitorNotFound(u64),

    /// Transport or availability failure, propagated unchanged.
    #[error("Ledger unavailable: {0}")]
    Unavailable(#[source] anyhow::Error),
}

/// Trait defining the interface to the external financial ledger
#[async_trait]
pub trait TransactionLedger: Send + Sync {
    /// List all transactions for a debitor in ledger append order
    async fn list_transactions(&self, debitor_id: u64) -> Result<Vec<Transaction>, LedgerError>;

    /// Append a new transaction
    async fn append_transaction(&self, transaction: &Transaction) -> Result<(), LedgerError>;
}

/// Trait defining the interface for attendee, history and count storage
#[async_trait]
pub trait AttendeeStore: Send + Sync {
    /// Store a new attendee, returning the assigned id
    async fn add_attendee(&self, attendee: &DomainAttendee) -> Result<u64>;

    /// Retrieve a specific attendee by id
    async fn get_attendee(&self, attendee_id: u64) -> Result<Option<DomainAttendee>>;

    /// Update an existing attendee
    async fn update_attendee(&self, attendee: &DomainAttendee) -> Result<()>;

    /// Find all registrations owned by a login subject
    async fn find_attendees_by_identity(&self, identity: &str) -> Result<Vec<DomainAttendee>>;

    /// List every attendee holding at least one of the given package,
    /// together with their current status
    async fn list_attendees_with_package(
        &self,
        package_code: &str,
    ) -> Result<Vec<(DomainAttendee, AttendeeStatus)>>;

    /// Append an entry to an attendee's status history
    async fn add_status_change(&self, change: &StatusChange) -> Result<()>;

    /// List the persisted status history of an attendee, oldest first.
    /// The implicit registration entry is not part of this list.
    async fn list_status_changes(&self, attendee_id: u64) -> Result<Vec<StatusChange>>;

    /// Create a zeroed count row. Provisioning only, not used by the domain.
    async fn init_count(&self, area: &str, name: &str) -> Result<()>;

    /// Read a count row. Fails if the row was never initialized.
    async fn get_count(&self, area: &str, name: &str) -> Result<Count>;

    /// Atomically add `delta` to the stored row and return the new values
    async fn add_count(&self, delta: &Count) -> Result<Count>;

    /// Overwrite a count row with absolute values
    async fn reset_count(&self, count: &Count) -> Result<()>;
}
