use anyhow::Result;
use async_trait::async_trait;
use shared::AttendeeStatus;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::config::ConfigSnapshot;
use crate::domain::models::attendee::Attendee;

/// Template variables handed to the mail service.
pub type NotificationVariables = BTreeMap<String, String>;

/// Port to whatever delivers templated mails to attendees.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send_notification(
        &self,
        template: &str,
        variables: &NotificationVariables,
        recipient: &str,
    ) -> Result<()>;
}

/// Sender for hosts without a mail service: writes the notification to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotificationSender;

#[async_trait]
impl NotificationSender for LoggingNotificationSender {
    async fn send_notification(
        &self,
        template: &str,
        variables: &NotificationVariables,
        recipient: &str,
    ) -> Result<()> {
        info!(
            "Notification {} to {} with {} variables (no mail service configured)",
            template,
            recipient,
            variables.len()
        );
        Ok(())
    }
}

/// Template name for the mail announcing `status`, e.g. `new-status-partially-paid`.
pub fn status_template(status: AttendeeStatus) -> String {
    format!("new-status-{}", status.as_str().replace(' ', "-"))
}

/// Statuses that have a mail. Attendees reset to `new` or removed as
/// `deleted` are not written to.
pub fn has_status_notification(status: AttendeeStatus) -> bool {
    !matches!(status, AttendeeStatus::New | AttendeeStatus::Deleted)
}

/// Formats a cent amount as e.g. `EUR 120.50`.
pub fn format_cents(currency: &str, cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.abs();
    format!("{} {}{}.{:02}", currency, sign, abs / 100, abs % 100)
}

/// Builds and sends status notifications.
#[derive(Clone)]
pub struct NotificationService {
    sender: Arc<dyn NotificationSender>,
    config: ConfigSnapshot,
}

impl NotificationService {
    pub fn new(sender: Arc<dyn NotificationSender>, config: ConfigSnapshot) -> Self {
        Self { sender, config }
    }

    /// Template variables for a status mail, taken from the attendee's
    /// freshly reconciled cached balances.
    pub fn status_variables(
        &self,
        attendee: &Attendee,
        status: AttendeeStatus,
        reason: &str,
    ) -> NotificationVariables {
        let currency = self.config.currency.as_str();
        let remaining = attendee.cache_total_dues - attendee.cache_payment_balance;

        let mut variables = NotificationVariables::new();
        variables.insert("nickname".to_string(), attendee.nickname.clone());
        variables.insert("badge_number".to_string(), attendee.id.to_string());
        variables.insert("new_status".to_string(), status.to_string());
        variables.insert(
            "total_dues".to_string(),
            format_cents(currency, attendee.cache_total_dues),
        );
        variables.insert(
            "pending_payments".to_string(),
            format_cents(currency, attendee.cache_open_balance),
        );
        variables.insert("remaining_dues".to_string(), format_cents(currency, remaining));
        variables.insert(
            "due_date".to_string(),
            attendee
                .cache_due_date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
        );
        variables.insert("reason".to_string(), reason.to_string());
        variables
    }

    pub async fn notify_status(
        &self,
        attendee: &Attendee,
        status: AttendeeStatus,
        reason: &str,
    ) -> Result<()> {
        if attendee.email.is_empty() {
            info!("Attendee {} has no email address, skipping notification", attendee.id);
            return Ok(());
        }
        let template = status_template(status);
        let variables = self.status_variables(attendee, status, reason);
        self.sender
            .send_notification(&template, &variables, &attendee.email)
            .await?;
        info!("Sent {} notification to attendee {}", template, attendee.id);
        Ok(())
    }
}
