use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Money owed by the debitor
    Due,
    /// Money received from the debitor
    Payment,
}

/// Processing state of a ledger entry, as reported by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Announced, e.g. a payment link was created
    Tentative,
    /// Awaiting confirmation from a payment provider
    Pending,
    /// Booked and counted towards balances
    Valid,
    /// Voided by a ledger administrator
    Deleted,
}

/// How a transaction came into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Booked by the registration system itself (dues and their corrections)
    Internal,
    Credit,
    Paypal,
    Transfer,
    Cash,
    Gift,
}

/// A signed gross amount in the smallest currency unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Amount {
    /// ISO 4217 currency code
    pub currency: String,
    /// Gross amount in cents (negative for compensating entries)
    pub gross_cent: i64,
    /// Applicable VAT rate in percent, e.g. 19.0
    pub vat_rate_percent: f64,
}

/// A single entry of the external financial ledger.
///
/// The ledger is append-only from the registration system's point of view.
/// Corrections are expressed as new entries with negated amounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Identifier assigned by the ledger on append, `None` before that
    pub transaction_identifier: Option<String>,
    /// The attendee the transaction is booked against
    pub debitor_id: u64,
    pub transaction_type: TransactionType,
    pub method: PaymentMethod,
    pub amount: Amount,
    pub comment: String,
    pub status: TransactionStatus,
    pub effective_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
}

impl Transaction {
    pub fn is_valid_due(&self) -> bool {
        self.status == TransactionStatus::Valid && self.transaction_type == TransactionType::Due
    }

    pub fn is_valid_payment(&self) -> bool {
        self.status == TransactionStatus::Valid
            && self.transaction_type == TransactionType::Payment
    }

    /// Payments that have been announced but not yet confirmed.
    pub fn is_open_payment(&self) -> bool {
        self.transaction_type == TransactionType::Payment
            && matches!(
                self.status,
                TransactionStatus::Tentative | TransactionStatus::Pending
            )
    }
}

/// Registration status of an attendee.
///
/// Variants are declared along the regular workflow, side exits last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AttendeeStatus {
    #[serde(rename = "new")]
    New,
    #[serde(rename = "approved")]
    Approved,
    #[serde(rename = "partially paid")]
    PartiallyPaid,
    #[serde(rename = "paid")]
    Paid,
    #[serde(rename = "checked in")]
    CheckedIn,
    #[serde(rename = "waiting")]
    Waiting,
    #[serde(rename = "cancelled")]
    Cancelled,
    #[serde(rename = "deleted")]
    Deleted,
}

impl AttendeeStatus {
    pub const ALL: [AttendeeStatus; 8] = [
        AttendeeStatus::New,
        AttendeeStatus::Approved,
        AttendeeStatus::PartiallyPaid,
        AttendeeStatus::Paid,
        AttendeeStatus::CheckedIn,
        AttendeeStatus::Waiting,
        AttendeeStatus::Cancelled,
        AttendeeStatus::Deleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AttendeeStatus::New => "new",
            AttendeeStatus::Approved => "approved",
            AttendeeStatus::PartiallyPaid => "partially paid",
            AttendeeStatus::Paid => "paid",
            AttendeeStatus::CheckedIn => "checked in",
            AttendeeStatus::Waiting => "waiting",
            AttendeeStatus::Cancelled => "cancelled",
            AttendeeStatus::Deleted => "deleted",
        }
    }

    /// Statuses from which no payment-related transition may start.
    pub fn is_pre_approval_or_gone(&self) -> bool {
        matches!(
            self,
            AttendeeStatus::New | AttendeeStatus::Cancelled | AttendeeStatus::Deleted
        )
    }

    /// Statuses whose status is derived from the payment situation.
    pub fn is_payment_driven(&self) -> bool {
        matches!(
            self,
            AttendeeStatus::Approved | AttendeeStatus::PartiallyPaid | AttendeeStatus::Paid
        )
    }
}

impl fmt::Display for AttendeeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttendeeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AttendeeStatus::ALL
            .iter()
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Invalid attendee status: {}", s))
    }
}

/// One entry of an attendee's status history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub attendee_id: u64,
    pub status: AttendeeStatus,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

/// Occupancy counters for one capacity-limited resource.
///
/// Also used as a delta when passed to an atomic add.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Count {
    pub area: String,
    pub name: String,
    /// Attendees in pre-approval states holding the resource
    pub pending: i64,
    /// Attendees in approved-or-later states holding the resource
    pub attending: i64,
}

impl Count {
    pub fn new(area: &str, name: &str) -> Self {
        Self {
            area: area.to_string(),
            name: name.to_string(),
            pending: 0,
            attending: 0,
        }
    }

    pub fn total(&self) -> i64 {
        self.pending + self.attending
    }

    pub fn is_zero(&self) -> bool {
        self.pending == 0 && self.attending == 0
    }
}
