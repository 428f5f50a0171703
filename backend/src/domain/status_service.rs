//! Status transition state machine.
//!
//! A status change goes through two gates before anything is written:
//! [`StatusService::status_change_allowed`] decides whether the caller may
//! request it, [`check_status_change_possible`] whether the attendee's ledger
//! permits it. Committing moves the package counts, reconciles dues and then
//! records the status the reconciliation settled on.

use chrono::{DateTime, Utc};
use shared::{AttendeeStatus, StatusChange, Transaction};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::ConfigSnapshot;
use crate::domain::balance_service::calculate_balances;
use crate::domain::clock::Clock;
use crate::domain::dues_service::DuesService;
use crate::domain::errors::{RegistrationError, RegistrationResult};
use crate::domain::models::{Actor, Attendee};
use crate::domain::notification_service::{has_status_notification, NotificationService};
use crate::domain::package_limit_service::PackageLimitService;
use crate::storage::AttendeeStore;

pub const REGISTRATION_COMMENT: &str = "registration";

/// The implicit first history entry. It is never persisted.
pub fn registration_entry(attendee_id: u64, created_at: DateTime<Utc>) -> StatusChange {
    StatusChange {
        attendee_id,
        status: AttendeeStatus::New,
        comment: REGISTRATION_COMMENT.to_string(),
        created_at,
    }
}

/// Full history: the registration entry followed by the persisted entries.
pub fn history_with_registration(attendee: &Attendee, persisted: Vec<StatusChange>) -> Vec<StatusChange> {
    let mut history = Vec::with_capacity(persisted.len() + 1);
    history.push(registration_entry(attendee.id, attendee.created_at));
    history.extend(persisted);
    history
}

pub fn latest_status(history: &[StatusChange]) -> AttendeeStatus {
    history.last().map(|c| c.status).unwrap_or(AttendeeStatus::New)
}

fn is_self_cancellation(old: AttendeeStatus, new: AttendeeStatus) -> bool {
    new == AttendeeStatus::Cancelled && matches!(old, AttendeeStatus::New | AttendeeStatus::Approved)
}

/// Financial preconditions for moving from `old` to `new`, judged on the
/// attendee's transaction history.
pub fn check_status_change_possible(
    history: &[Transaction],
    old: AttendeeStatus,
    new: AttendeeStatus,
    grace_amount_cents: i64,
) -> RegistrationResult<()> {
    if old == new {
        return Err(RegistrationError::SameStatus(new));
    }

    let balances = calculate_balances(history);
    let dues = balances.valid_dues;
    let paid = balances.valid_payments;

    match new {
        AttendeeStatus::New | AttendeeStatus::Approved | AttendeeStatus::Waiting => {
            if paid > 0 {
                return Err(RegistrationError::HasPayments(new));
            }
        }
        AttendeeStatus::PartiallyPaid => {
            if old.is_pre_approval_or_gone() {
                return Err(RegistrationError::GoToApprovedFirst(new, old));
            }
            if paid < 0 || paid >= dues {
                return Err(RegistrationError::PaymentBalanceMismatch(new));
            }
        }
        AttendeeStatus::Paid => {
            if old.is_pre_approval_or_gone() {
                return Err(RegistrationError::GoToApprovedFirst(new, old));
            }
            if paid < dues - grace_amount_cents {
                return Err(RegistrationError::InsufficientPayment(new));
            }
        }
        AttendeeStatus::CheckedIn => {
            if old.is_pre_approval_or_gone() {
                return Err(RegistrationError::GoToApprovedFirst(new, old));
            }
            if paid < dues {
                return Err(RegistrationError::InsufficientPayment(new));
            }
        }
        AttendeeStatus::Cancelled => {}
        AttendeeStatus::Deleted => {
            if history
                .iter()
                .any(|tx| tx.is_valid_payment() && tx.amount.gross_cent != 0)
            {
                return Err(RegistrationError::CannotDelete);
            }
        }
    }
    Ok(())
}

/// What a committed status change ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChangeOutcome {
    /// Status after reconciliation
    pub status: AttendeeStatus,
    /// Whether a history entry was written (and a notification sent)
    pub recorded: bool,
}

#[derive(Clone)]
pub struct StatusService {
    store: Arc<dyn AttendeeStore>,
    dues_service: DuesService,
    limit_service: PackageLimitService,
    notification_service: NotificationService,
    config: ConfigSnapshot,
    clock: Arc<dyn Clock>,
}

impl StatusService {
    pub fn new(
        store: Arc<dyn AttendeeStore>,
        dues_service: DuesService,
        limit_service: PackageLimitService,
        notification_service: NotificationService,
        config: ConfigSnapshot,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            dues_service,
            limit_service,
            notification_service,
            config,
            clock,
        }
    }

    async fn load_attendee(&self, attendee_id: u64) -> RegistrationResult<Attendee> {
        self.store
            .get_attendee(attendee_id)
            .await?
            .ok_or(RegistrationError::AttendeeNotFound(attendee_id))
    }

    pub async fn status_history(&self, attendee_id: u64) -> RegistrationResult<Vec<StatusChange>> {
        let attendee = self.load_attendee(attendee_id).await?;
        let persisted = self.store.list_status_changes(attendee_id).await?;
        Ok(history_with_registration(&attendee, persisted))
    }

    pub async fn current_status(&self, attendee_id: u64) -> RegistrationResult<AttendeeStatus> {
        Ok(latest_status(&self.status_history(attendee_id).await?))
    }

    /// Authorization gate for a status change.
    pub async fn status_change_allowed(
        &self,
        actor: &Actor,
        attendee: &Attendee,
        old: AttendeeStatus,
        new: AttendeeStatus,
    ) -> RegistrationResult<()> {
        if actor.is_privileged() {
            return Ok(());
        }
        let Some(subject) = actor.subject() else {
            return Err(RegistrationError::NotAllowed);
        };

        if attendee.identity == subject {
            if is_self_cancellation(old, new) {
                return Ok(());
            }
            warn!(
                target: "security",
                "User {} attempted status change {} -> {} on own registration {}",
                subject, old, new, attendee.id
            );
            return Err(RegistrationError::NotAllowed);
        }

        if old == AttendeeStatus::Paid && new == AttendeeStatus::CheckedIn {
            let permission = self.config.regdesk_permission.as_str();
            let own = self.store.find_attendees_by_identity(subject).await?;
            if own.iter().any(|a| a.has_permission(permission)) {
                debug!("User {} checks in attendee {} with {} permission", subject, attendee.id, permission);
                return Ok(());
            }
        }

        warn!(
            target: "security",
            "User {} attempted status change {} -> {} on foreign registration {}",
            subject, old, new, attendee.id
        );
        Err(RegistrationError::NotAllowed)
    }

    /// Validate and commit a status change.
    ///
    /// The reconciled status may differ from the requested one; a history
    /// entry and a notification are only produced if it differs from the
    /// old status.
    pub async fn change_status(
        &self,
        actor: &Actor,
        attendee_id: u64,
        new_status: AttendeeStatus,
        comment: &str,
    ) -> RegistrationResult<StatusChangeOutcome> {
        let attendee = self.load_attendee(attendee_id).await?;
        let old_status = self.current_status(attendee_id).await?;

        self.status_change_allowed(actor, &attendee, old_status, new_status)
            .await?;
        let history = self.dues_service.transaction_history(attendee_id).await?;
        check_status_change_possible(&history, old_status, new_status, self.config.grace_amount_cents)?;

        let deltas = self
            .limit_service
            .reserve(&attendee.packages, &attendee.packages, old_status, new_status)
            .await?;

        let mut updated = attendee;
        let outcome = self
            .commit_status_change(&mut updated, old_status, new_status, comment)
            .await;
        if outcome.is_err() {
            self.limit_service.revert_deltas(&deltas).await;
        }
        outcome
    }

    /// Reconcile, persist and record. Ledger bookings made before a failure
    /// stay; the next reconciliation corrects them from ledger content.
    async fn commit_status_change(
        &self,
        updated: &mut Attendee,
        old_status: AttendeeStatus,
        new_status: AttendeeStatus,
        comment: &str,
    ) -> RegistrationResult<StatusChangeOutcome> {
        let attendee_id = updated.id;
        let reconciliation = self
            .dues_service
            .reconcile(updated, old_status, new_status, None)
            .await?;
        if reconciliation.changed {
            self.store.update_attendee(updated).await?;
        }

        let status = reconciliation.status;
        if status == old_status {
            info!(
                "Status change for attendee {} to {} settled back on {}, nothing recorded",
                attendee_id, new_status, old_status
            );
            return Ok(StatusChangeOutcome {
                status,
                recorded: false,
            });
        }

        self.record_status_change(updated, status, comment).await?;
        Ok(StatusChangeOutcome {
            status,
            recorded: true,
        })
    }

    /// Append a history entry and notify the attendee.
    ///
    /// A failed notification is logged; the status change stands. Statuses
    /// without a mail (see [`has_status_notification`]) are only recorded.
    pub async fn record_status_change(
        &self,
        attendee: &Attendee,
        status: AttendeeStatus,
        comment: &str,
    ) -> RegistrationResult<()> {
        self.store
            .add_status_change(&StatusChange {
                attendee_id: attendee.id,
                status,
                comment: comment.to_string(),
                created_at: self.clock.now(),
            })
            .await?;
        info!("Attendee {} is now {}", attendee.id, status);

        if !has_status_notification(status) {
            debug!("No notification for status {}, attendee {}", status, attendee.id);
            return Ok(());
        }
        if let Err(e) = self
            .notification_service
            .notify_status(attendee, status, comment)
            .await
        {
            warn!("Failed to notify attendee {} about status {}: {}", attendee.id, status, e);
        }
        Ok(())
    }

    /// Send the mail for the current status again.
    pub async fn resend_status_notification(&self, attendee_id: u64) -> RegistrationResult<AttendeeStatus> {
        let attendee = self.load_attendee(attendee_id).await?;
        let history = self.status_history(attendee_id).await?;
        let status = latest_status(&history);
        if !has_status_notification(status) {
            return Err(RegistrationError::NoNotification(status));
        }

        let reason = history.last().map(|c| c.comment.as_str()).unwrap_or_default();
        self.notification_service
            .notify_status(&attendee, status, reason)
            .await?;
        Ok(status)
    }
}
