//! # Domain Module
//!
//! Business logic of the registration core. Services depend only on the
//! storage port traits and on an immutable configuration snapshot.
//!
//! - [`balance_service`]: ledger history to balances
//! - [`dues_service`]: dues reconciliation
//! - [`status_service`]: status transition state machine
//! - [`package_limit_service`]: package capacity accounting
//! - [`registration_service`]: registration and admin edits
//! - [`notification_service`]: status mails

pub mod balance_service;
pub mod clock;
pub mod dues_service;
pub mod errors;
pub mod models;
pub mod notification_service;
pub mod package_limit_service;
pub mod registration_service;
pub mod status_service;

pub use balance_service::{BalanceService, Balances};
pub use clock::{Clock, FixedClock, SystemClock};
pub use dues_service::{DuesService, Reconciliation};
pub use errors::{RegistrationError, RegistrationResult};
pub use notification_service::{LoggingNotificationSender, NotificationSender, NotificationService};
pub use package_limit_service::PackageLimitService;
pub use registration_service::RegistrationService;
pub use status_service::{StatusChangeOutcome, StatusService};
