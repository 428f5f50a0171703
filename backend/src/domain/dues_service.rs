//! Dues reconciliation.
//!
//! Keeps the ledger and the attendee's cached balances consistent with the
//! attendee's status and package selection. The ledger is never edited;
//! every correction is a new due transaction, usually with a negative amount.
//!
//! Reconciliation is split into pure planning functions (history in,
//! transactions to append out) and [`DuesService::reconcile`], which books the
//! plan and refreshes the cached balances. All plans are derived from ledger
//! content alone, so re-running a reconciliation is self-correcting.

use shared::{Amount, AttendeeStatus, PaymentMethod, Transaction, TransactionStatus, TransactionType};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{ConfigSnapshot, RegistrationConfig};
use crate::domain::balance_service::{
    calculate_balances, valid_dues_by_vat, BalanceService, Balances, VatBuckets, VatRate,
};
use crate::domain::clock::Clock;
use crate::domain::errors::{RegistrationError, RegistrationResult};
use crate::domain::models::attendee::Attendee;
use crate::storage::TransactionLedger;

pub const DEFAULT_ADJUSTMENT_COMMENT: &str =
    "dues adjustment due to change in status or selected packages";

/// Result of a reconciliation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciliation {
    /// The status the attendee should end up in. Differs from the requested
    /// status when the payment situation dictates otherwise.
    pub status: AttendeeStatus,
    /// Whether the attendee record was modified and needs to be persisted
    pub changed: bool,
    /// Number of transactions appended to the ledger
    pub booked: usize,
}

/// Dates, currency and defaults shared by every planned transaction.
#[derive(Debug, Clone)]
pub struct BookingContext {
    pub debitor_id: u64,
    pub currency: String,
    pub effective_date: chrono::NaiveDate,
    pub due_date: chrono::NaiveDate,
}

impl BookingContext {
    fn due(&self, gross_cent: i64, vat: VatRate, comment: &str) -> Transaction {
        Transaction {
            transaction_identifier: None,
            debitor_id: self.debitor_id,
            transaction_type: TransactionType::Due,
            method: PaymentMethod::Internal,
            amount: Amount {
                currency: self.currency.clone(),
                gross_cent,
                vat_rate_percent: vat.percent(),
            },
            comment: comment.to_string(),
            status: TransactionStatus::Valid,
            effective_date: self.effective_date,
            due_date: Some(self.due_date),
        }
    }
}

/// Remove every valid due, one compensating transaction per VAT rate.
pub fn plan_compensate_all_dues(
    history: &[Transaction],
    new_status: AttendeeStatus,
    ctx: &BookingContext,
) -> Vec<Transaction> {
    let comment = format!("remove dues balance - status changed to {}", new_status);
    valid_dues_by_vat(history)
        .into_iter()
        .filter(|(_, amount)| *amount != 0)
        .map(|(vat, amount)| ctx.due(-amount, vat, &comment))
        .collect()
}

/// Remove only the unpaid portion of the dues.
///
/// Payments are applied to the dues in ledger order. Dues that were already
/// reduced by negative due entries count as paid by that reduction.
pub fn plan_compensate_unpaid_dues(history: &[Transaction], ctx: &BookingContext) -> Vec<Transaction> {
    let comment = "remove unpaid dues - status changed to cancelled";

    let mut available_payments: i64 = history
        .iter()
        .filter(|tx| tx.is_valid_payment())
        .map(|tx| tx.amount.gross_cent)
        .sum();
    available_payments += history
        .iter()
        .filter(|tx| tx.is_valid_due() && tx.amount.gross_cent < 0)
        .map(|tx| -tx.amount.gross_cent)
        .sum::<i64>();

    let mut planned = Vec::new();
    for tx in history
        .iter()
        .filter(|tx| tx.is_valid_due() && tx.amount.gross_cent > 0)
    {
        let amount = tx.amount.gross_cent;
        let vat = VatRate::from_percent(tx.amount.vat_rate_percent);
        if available_payments >= amount {
            available_payments -= amount;
        } else {
            let uncovered = amount - available_payments.max(0);
            available_payments = 0;
            planned.push(ctx.due(-uncovered, vat, comment));
        }
    }
    planned
}

/// Desired dues per VAT rate for the attendee's manual dues and packages.
pub fn desired_dues_by_vat(
    attendee: &Attendee,
    config: &RegistrationConfig,
) -> RegistrationResult<VatBuckets> {
    let mut desired = VatBuckets::new();

    let manual = attendee.admin_info.manual_dues;
    if manual != 0 {
        *desired
            .entry(VatRate::from_percent(config.manual_dues_vat_percent))
            .or_insert(0) += manual;
    }

    if !attendee.has_flag(&config.guest_flag) {
        for (code, count) in &attendee.packages {
            let package = config
                .package(code)
                .ok_or_else(|| RegistrationError::InvalidPackage(code.clone()))?;
            *desired
                .entry(VatRate::from_percent(package.vat_percent))
                .or_insert(0) += package.price_cents * i64::from(*count);
        }
    }

    Ok(desired)
}

/// Book the difference between desired and current dues for every VAT rate.
pub fn plan_package_adjustment(
    attendee: &Attendee,
    history: &[Transaction],
    comment_override: Option<&str>,
    config: &RegistrationConfig,
    ctx: &BookingContext,
) -> RegistrationResult<Vec<Transaction>> {
    let mut desired = desired_dues_by_vat(attendee, config)?;
    let current = valid_dues_by_vat(history);
    for vat in current.keys() {
        desired.entry(*vat).or_insert(0);
    }

    let manual_vat = VatRate::from_percent(config.manual_dues_vat_percent);
    let manual_description = attendee.admin_info.manual_dues_description.as_str();

    let mut planned = Vec::new();
    for (vat, wanted) in desired {
        let have = current.get(&vat).copied().unwrap_or(0);
        if wanted == have {
            continue;
        }
        let comment = match comment_override {
            Some(comment) => comment,
            None if vat == manual_vat
                && attendee.admin_info.manual_dues != 0
                && !manual_description.is_empty() =>
            {
                manual_description
            }
            None => DEFAULT_ADJUSTMENT_COMMENT,
        };
        planned.push(ctx.due(wanted - have, vat, comment));
    }
    Ok(planned)
}

/// Status for an attendee whose status follows the payment situation.
///
/// Statuses outside approved / partially paid / paid are returned as-is, so a
/// checked-in attendee is never pulled back down.
pub fn payment_driven_status(
    requested: AttendeeStatus,
    balances: &Balances,
    grace_amount_cents: i64,
) -> AttendeeStatus {
    if !requested.is_payment_driven() {
        return requested;
    }
    let dues = balances.valid_dues;
    let payments = balances.valid_payments;
    if dues <= 0 || payments >= dues - grace_amount_cents {
        AttendeeStatus::Paid
    } else if payments <= 0 {
        AttendeeStatus::Approved
    } else {
        AttendeeStatus::PartiallyPaid
    }
}

/// Books dues corrections and refreshes cached balances.
#[derive(Clone)]
pub struct DuesService {
    balance_service: BalanceService,
    ledger: Arc<dyn TransactionLedger>,
    config: ConfigSnapshot,
    clock: Arc<dyn Clock>,
}

impl DuesService {
    pub fn new(
        ledger: Arc<dyn TransactionLedger>,
        config: ConfigSnapshot,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            balance_service: BalanceService::new(ledger.clone()),
            ledger,
            config,
            clock,
        }
    }

    fn booking_context(&self, debitor_id: u64) -> BookingContext {
        let today = self.clock.today();
        BookingContext {
            debitor_id,
            currency: self.config.currency.clone(),
            effective_date: today,
            due_date: self.config.due_date_for(today),
        }
    }

    /// Bring ledger and cached balances in line with `new_status`.
    ///
    /// The attendee is only modified once every append has succeeded. If the
    /// ledger fails part-way, the error is returned and the cached balances
    /// stay as they were (stale, never half-updated). Persisting the attendee
    /// when [`Reconciliation::changed`] is set is the caller's job.
    pub async fn reconcile(
        &self,
        attendee: &mut Attendee,
        old_status: AttendeeStatus,
        new_status: AttendeeStatus,
        comment_override: Option<&str>,
    ) -> RegistrationResult<Reconciliation> {
        debug!(
            "Reconciling dues for attendee {}: {} -> {}",
            attendee.id, old_status, new_status
        );
        let mut history = self.balance_service.transaction_history(attendee.id).await?;
        let ctx = self.booking_context(attendee.id);

        let planned = match new_status {
            AttendeeStatus::New | AttendeeStatus::Deleted | AttendeeStatus::Waiting => {
                plan_compensate_all_dues(&history, new_status, &ctx)
            }
            AttendeeStatus::Cancelled => plan_compensate_unpaid_dues(&history, &ctx),
            _ => plan_package_adjustment(attendee, &history, comment_override, &self.config, &ctx)?,
        };

        for tx in &planned {
            info!(
                "Booking dues correction for attendee {}: {} cents at {}% ({})",
                attendee.id, tx.amount.gross_cent, tx.amount.vat_rate_percent, tx.comment
            );
            self.ledger.append_transaction(tx).await?;
        }
        if !planned.is_empty() {
            history = self.balance_service.transaction_history(attendee.id).await?;
        }

        let balances = calculate_balances(&history);
        let mut refreshed = balances.to_cached();
        // manual edits may have pushed the due date out, never pull it in
        refreshed.due_date = refreshed.due_date.max(attendee.cache_due_date);

        let mut changed = false;
        if refreshed != attendee.cached_balances() {
            attendee.set_cached_balances(refreshed);
            changed = true;
        }
        let identity_changed = if new_status == AttendeeStatus::Deleted {
            attendee.mark_deleted()
        } else {
            attendee.unmark_deleted()
        };
        changed |= identity_changed;

        let status = payment_driven_status(new_status, &balances, self.config.grace_amount_cents);
        if status != new_status {
            debug!(
                "Attendee {} requested {} but payment situation says {}",
                attendee.id, new_status, status
            );
        }

        Ok(Reconciliation {
            status,
            changed,
            booked: planned.len(),
        })
    }

    /// Current balances for an attendee, straight from the ledger.
    pub async fn balances(&self, attendee_id: u64) -> RegistrationResult<Balances> {
        Ok(self.balance_service.balances_for(attendee_id).await?)
    }

    pub async fn transaction_history(&self, attendee_id: u64) -> RegistrationResult<Vec<Transaction>> {
        Ok(self.balance_service.transaction_history(attendee_id).await?)
    }
}
