//! Balance calculation for the registration system.
//!
//! Balances are never stored authoritatively. They are derived from the
//! attendee's ledger history every time, and only cached on the attendee
//! record for listing and searching.

use chrono::NaiveDate;
use shared::Transaction;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::domain::models::attendee::CachedBalances;
use crate::storage::{LedgerError, TransactionLedger};

/// Aggregate figures derived from one attendee's transaction history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Balances {
    pub valid_dues: i64,
    pub valid_payments: i64,
    /// Tentative or pending payments not yet counted as paid
    pub open_payments: i64,
    /// Due date of the earliest unpaid dues
    pub due_date: Option<NaiveDate>,
}

impl Balances {
    pub fn remaining_dues(&self) -> i64 {
        self.valid_dues - self.valid_payments
    }

    pub fn to_cached(self) -> CachedBalances {
        CachedBalances {
            total_dues: self.valid_dues,
            payment_balance: self.valid_payments,
            open_balance: self.open_payments,
            due_date: self.due_date,
        }
    }
}

/// Grouping key for amounts by VAT rate.
///
/// Stored in hundredths of a percent so that it can be compared and hashed
/// exactly; 19.0 % becomes `VatRate(1900)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VatRate(i64);

impl VatRate {
    pub fn from_percent(percent: f64) -> Self {
        VatRate((percent * 100.0).round() as i64)
    }

    pub fn percent(&self) -> f64 {
        self.0 as f64 / 100.0
    }
}

/// Sum of gross amounts per VAT rate.
pub type VatBuckets = BTreeMap<VatRate, i64>;

/// Compute balances for a transaction history given in ledger append order.
pub fn calculate_balances(transactions: &[Transaction]) -> Balances {
    let mut balances = Balances::default();
    let mut default_due_date = None;

    for tx in transactions {
        if tx.is_valid_payment() {
            balances.valid_payments += tx.amount.gross_cent;
        } else if tx.is_valid_due() {
            balances.valid_dues += tx.amount.gross_cent;
            if tx.due_date.is_some() {
                default_due_date = tx.due_date;
            }
        } else if tx.is_open_payment() {
            balances.open_payments += tx.amount.gross_cent;
        }
    }

    // the earliest due amount not covered by payments determines urgency
    balances.due_date = default_due_date;
    let mut accrued_dues = 0;
    for tx in transactions.iter().filter(|tx| tx.is_valid_due()) {
        accrued_dues += tx.amount.gross_cent;
        if accrued_dues > balances.valid_payments {
            if tx.due_date.is_some() {
                balances.due_date = tx.due_date;
            }
            break;
        }
    }

    balances
}

/// Current valid dues grouped by VAT rate.
pub fn valid_dues_by_vat(transactions: &[Transaction]) -> VatBuckets {
    let mut buckets = VatBuckets::new();
    for tx in transactions.iter().filter(|tx| tx.is_valid_due()) {
        *buckets
            .entry(VatRate::from_percent(tx.amount.vat_rate_percent))
            .or_insert(0) += tx.amount.gross_cent;
    }
    buckets
}

/// Reads transaction histories from the ledger and derives balances.
#[derive(Clone)]
pub struct BalanceService {
    ledger: Arc<dyn TransactionLedger>,
}

impl BalanceService {
    pub fn new(ledger: Arc<dyn TransactionLedger>) -> Self {
        Self { ledger }
    }

    /// The debitor's transactions in ledger order. An unknown debitor has
    /// an empty history.
    pub async fn transaction_history(&self, debitor_id: u64) -> Result<Vec<Transaction>, LedgerError> {
        match self.ledger.list_transactions(debitor_id).await {
            Ok(transactions) => Ok(transactions),
            Err(LedgerError::DebitorNotFound(_)) => {
                debug!("No ledger entries for attendee {}, treating as empty", debitor_id);
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn balances_for(&self, debitor_id: u64) -> Result<Balances, LedgerError> {
        let history = self.transaction_history(debitor_id).await?;
        Ok(calculate_balances(&history))
    }
}
