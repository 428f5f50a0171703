//! Error types returned by the registration domain services.

use crate::storage::LedgerError;
use shared::AttendeeStatus;
use thiserror::Error;

/// Outcome of a rejected or failed domain operation.
///
/// Everything except [`RegistrationError::Ledger`] and
/// [`RegistrationError::Downstream`] is an expected rejection that the API
/// layer translates into a client-facing response.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("Attendee not found: {0}")]
    AttendeeNotFound(u64),

    #[error("Old and new status are the same: {0}")]
    SameStatus(AttendeeStatus),

    #[error("Insufficient payment for status {0}")]
    InsufficientPayment(AttendeeStatus),

    #[error("There is a non-zero payment balance, cannot go to {0}; use partially paid or refund")]
    HasPayments(AttendeeStatus),

    #[error("Payment balance does not fit status {0}")]
    PaymentBalanceMismatch(AttendeeStatus),

    #[error("Cannot go to {0} from {1}, go to approved first")]
    GoToApprovedFirst(AttendeeStatus, AttendeeStatus),

    #[error("Cannot delete attendee with valid payments, use cancelled instead")]
    CannotDelete,

    #[error("You are not allowed to make this status transition")]
    NotAllowed,

    #[error("There is no notification for status {0}")]
    NoNotification(AttendeeStatus),

    #[error("Unknown package: {0}")]
    InvalidPackage(String),

    #[error("Booking limit exceeded for {area} {name}")]
    Overrun { area: String, name: String },

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Downstream(#[from] anyhow::Error),
}

impl RegistrationError {
    /// True for rejections that are a normal part of the workflow.
    pub fn is_precondition(&self) -> bool {
        !matches!(
            self,
            RegistrationError::Ledger(_) | RegistrationError::Downstream(_)
        )
    }
}

pub type RegistrationResult<T> = Result<T, RegistrationError>;
