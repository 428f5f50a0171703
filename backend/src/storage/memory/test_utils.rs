//! Test utilities wiring the in-memory adapters into a full service set.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use shared::{
    Amount, AttendeeStatus, Count, PaymentMethod, StatusChange, Transaction, TransactionStatus,
    TransactionType,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::{ConfigSnapshot, PackageConfig, RegistrationConfig};
use crate::domain::clock::{Clock, FixedClock};
use crate::domain::dues_service::DuesService;
use crate::domain::models::attendee::{AdminInfo, Attendee};
use crate::domain::notification_service::{NotificationSender, NotificationService, NotificationVariables};
use crate::domain::package_limit_service::PackageLimitService;
use crate::domain::registration_service::RegistrationService;
use crate::domain::status_service::StatusService;
use crate::storage::memory::{InMemoryAttendeeStore, InMemoryLedger};
use crate::storage::{AttendeeStore, TransactionLedger};

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

pub fn due_tx(debitor_id: u64, gross_cent: i64, vat_rate_percent: f64, due_date: NaiveDate) -> Transaction {
    Transaction {
        transaction_identifier: None,
        debitor_id,
        transaction_type: TransactionType::Due,
        method: PaymentMethod::Internal,
        amount: Amount {
            currency: "EUR".to_string(),
            gross_cent,
            vat_rate_percent,
        },
        comment: "test dues".to_string(),
        status: TransactionStatus::Valid,
        effective_date: date(2023, 1, 10),
        due_date: Some(due_date),
    }
}

pub fn payment_tx(debitor_id: u64, gross_cent: i64) -> Transaction {
    Transaction {
        transaction_identifier: None,
        debitor_id,
        transaction_type: TransactionType::Payment,
        method: PaymentMethod::Transfer,
        amount: Amount {
            currency: "EUR".to_string(),
            gross_cent,
            vat_rate_percent: 0.0,
        },
        comment: "test payment".to_string(),
        status: TransactionStatus::Valid,
        effective_date: date(2023, 1, 15),
        due_date: None,
    }
}

pub fn sample_attendee() -> Attendee {
    Attendee {
        id: 0,
        nickname: "Squirrel".to_string(),
        first_name: "Sam".to_string(),
        last_name: "Doe".to_string(),
        email: "squirrel@example.com".to_string(),
        identity: "subject-squirrel".to_string(),
        zip: "12345".to_string(),
        packages: BTreeMap::new(),
        admin_info: AdminInfo {
            flags: BTreeSet::new(),
            permissions: BTreeSet::new(),
            manual_dues: 0,
            manual_dues_description: String::new(),
        },
        cache_total_dues: 0,
        cache_payment_balance: 0,
        cache_open_balance: 0,
        cache_due_date: None,
        created_at: Utc.with_ymd_and_hms(2023, 1, 1, 10, 0, 0).unwrap(),
    }
}

fn package(code: &str, price_cents: i64, vat_percent: f64, limit: u32) -> PackageConfig {
    PackageConfig {
        code: code.to_string(),
        price_cents,
        vat_percent,
        limit,
    }
}

/// Config used by every service test: only `stage` is limited (4 places).
pub fn test_config() -> RegistrationConfig {
    RegistrationConfig {
        packages: vec![
            package("room-none", 0, 7.0, 0),
            package("attendance", 12000, 19.0, 0),
            package("room-single", 4000, 7.0, 0),
            package("stage", 1000, 19.0, 4),
        ],
        ..RegistrationConfig::default()
    }
}

#[derive(Debug, Clone)]
pub struct SentNotification {
    pub template: String,
    pub variables: NotificationVariables,
    pub recipient: String,
}

/// Notification sender that keeps everything it was asked to send.
#[derive(Default)]
pub struct RecordingNotificationSender {
    sent: Mutex<Vec<SentNotification>>,
}

impl RecordingNotificationSender {
    pub async fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl NotificationSender for RecordingNotificationSender {
    async fn send_notification(
        &self,
        template: &str,
        variables: &NotificationVariables,
        recipient: &str,
    ) -> Result<()> {
        self.sent.lock().await.push(SentNotification {
            template: template.to_string(),
            variables: variables.clone(),
            recipient: recipient.to_string(),
        });
        Ok(())
    }
}

/// Wraps the in-memory store and fails selected writes on demand.
/// Count operations always go through, so reverts can be observed.
pub struct FaultyAttendeeStore {
    inner: Arc<InMemoryAttendeeStore>,
    fail_attendee_updates: AtomicBool,
    fail_status_changes: AtomicBool,
}

impl FaultyAttendeeStore {
    pub fn new(inner: Arc<InMemoryAttendeeStore>) -> Self {
        Self {
            inner,
            fail_attendee_updates: AtomicBool::new(false),
            fail_status_changes: AtomicBool::new(false),
        }
    }

    pub fn fail_attendee_updates(&self, fail: bool) {
        self.fail_attendee_updates.store(fail, Ordering::SeqCst);
    }

    pub fn fail_status_changes(&self, fail: bool) {
        self.fail_status_changes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl AttendeeStore for FaultyAttendeeStore {
    async fn add_attendee(&self, attendee: &Attendee) -> Result<u64> {
        self.inner.add_attendee(attendee).await
    }

    async fn get_attendee(&self, attendee_id: u64) -> Result<Option<Attendee>> {
        self.inner.get_attendee(attendee_id).await
    }

    async fn update_attendee(&self, attendee: &Attendee) -> Result<()> {
        if self.fail_attendee_updates.load(Ordering::SeqCst) {
            return Err(anyhow!("attendee store rejected update of {}", attendee.id));
        }
        self.inner.update_attendee(attendee).await
    }

    async fn find_attendees_by_identity(&self, identity: &str) -> Result<Vec<Attendee>> {
        self.inner.find_attendees_by_identity(identity).await
    }

    async fn list_attendees_with_package(
        &self,
        package_code: &str,
    ) -> Result<Vec<(Attendee, AttendeeStatus)>> {
        self.inner.list_attendees_with_package(package_code).await
    }

    async fn add_status_change(&self, change: &StatusChange) -> Result<()> {
        if self.fail_status_changes.load(Ordering::SeqCst) {
            return Err(anyhow!("attendee store rejected status change of {}", change.attendee_id));
        }
        self.inner.add_status_change(change).await
    }

    async fn list_status_changes(&self, attendee_id: u64) -> Result<Vec<StatusChange>> {
        self.inner.list_status_changes(attendee_id).await
    }

    async fn init_count(&self, area: &str, name: &str) -> Result<()> {
        self.inner.init_count(area, name).await
    }

    async fn get_count(&self, area: &str, name: &str) -> Result<Count> {
        self.inner.get_count(area, name).await
    }

    async fn add_count(&self, delta: &Count) -> Result<Count> {
        self.inner.add_count(delta).await
    }

    async fn reset_count(&self, count: &Count) -> Result<()> {
        self.inner.reset_count(count).await
    }
}

/// Test helper that provides the in-memory adapters and every service,
/// with the clock fixed at 2023-01-20 (dues fall due 2023-02-03).
pub struct TestHelper {
    pub ledger: Arc<InMemoryLedger>,
    pub store: Arc<InMemoryAttendeeStore>,
    /// The store the services talk to; wraps `store`
    pub faults: Arc<FaultyAttendeeStore>,
    pub notifications: Arc<RecordingNotificationSender>,
    pub config: ConfigSnapshot,
    pub dues_service: DuesService,
    pub limit_service: PackageLimitService,
    pub status_service: StatusService,
    pub registration_service: RegistrationService,
}

impl TestHelper {
    pub fn new() -> Self {
        let ledger = Arc::new(InMemoryLedger::new());
        let store = Arc::new(InMemoryAttendeeStore::new());
        let faults = Arc::new(FaultyAttendeeStore::new(store.clone()));
        let notifications = Arc::new(RecordingNotificationSender::default());
        let config: ConfigSnapshot = Arc::new(test_config());
        let clock: Arc<dyn Clock> =
            Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2023, 1, 20, 12, 0, 0).unwrap()));

        let dues_service = DuesService::new(ledger.clone(), config.clone(), clock.clone());
        let limit_service = PackageLimitService::new(faults.clone(), config.clone());
        let notification_service = NotificationService::new(notifications.clone(), config.clone());
        let status_service = StatusService::new(
            faults.clone(),
            dues_service.clone(),
            limit_service.clone(),
            notification_service,
            config.clone(),
            clock,
        );
        let registration_service = RegistrationService::new(
            faults.clone(),
            dues_service.clone(),
            limit_service.clone(),
            status_service.clone(),
            config.clone(),
        );

        Self {
            ledger,
            store,
            faults,
            notifications,
            config,
            dues_service,
            limit_service,
            status_service,
            registration_service,
        }
    }

    /// Like [`TestHelper::new`], with count rows provisioned.
    pub async fn with_counts() -> Self {
        let helper = Self::new();
        helper.limit_service.provision_counts().await.unwrap();
        helper
    }

    /// Put an attendee straight into the store, bypassing registration.
    pub async fn stored_attendee(&self, packages: &[(&str, u32)]) -> Attendee {
        let mut attendee = sample_attendee();
        attendee.packages = packages.iter().map(|(c, n)| (c.to_string(), *n)).collect();
        attendee.id = self.store.add_attendee(&attendee).await.unwrap();
        attendee
    }

    /// Register an attendee through the registration service.
    pub async fn register(&self, packages: &[(&str, u32)]) -> u64 {
        let mut attendee = sample_attendee();
        attendee.packages = packages.iter().map(|(c, n)| (c.to_string(), *n)).collect();
        self.registration_service.register(attendee).await.unwrap()
    }

    pub async fn book_payment(&self, attendee_id: u64, cents: i64) {
        self.ledger
            .append_transaction(&payment_tx(attendee_id, cents))
            .await
            .unwrap();
    }

    /// Append a history entry without going through the state machine.
    pub async fn set_status(&self, attendee_id: u64, status: AttendeeStatus) {
        self.store
            .add_status_change(&StatusChange {
                attendee_id,
                status,
                comment: String::new(),
                created_at: Utc.with_ymd_and_hms(2023, 1, 20, 12, 0, 0).unwrap(),
            })
            .await
            .unwrap();
    }
}
