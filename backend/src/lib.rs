//! # Registration Backend
//!
//! Core of a convention registration system: dues reconciliation against an
//! external append-only ledger, the attendee status workflow and capacity
//! limits for bookable packages. HTTP, authentication and persistence live
//! outside this crate and talk to it through the traits in [`storage`] and
//! [`domain::NotificationSender`].

use std::sync::Arc;

pub mod config;
pub mod domain;
pub mod logging;
pub mod storage;

use config::ConfigSnapshot;
use domain::{
    Clock, DuesService, NotificationSender, NotificationService, PackageLimitService,
    RegistrationService, StatusService,
};
use storage::{AttendeeStore, TransactionLedger};

/// All services, wired against one set of ports.
#[derive(Clone)]
pub struct Backend {
    pub dues_service: DuesService,
    pub limit_service: PackageLimitService,
    pub status_service: StatusService,
    pub registration_service: RegistrationService,
}

impl Backend {
    pub fn new(
        ledger: Arc<dyn TransactionLedger>,
        store: Arc<dyn AttendeeStore>,
        sender: Arc<dyn NotificationSender>,
        config: ConfigSnapshot,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let dues_service = DuesService::new(ledger, config.clone(), clock.clone());
        let limit_service = PackageLimitService::new(store.clone(), config.clone());
        let notification_service = NotificationService::new(sender, config.clone());
        let status_service = StatusService::new(
            store.clone(),
            dues_service.clone(),
            limit_service.clone(),
            notification_service,
            config.clone(),
            clock,
        );
        let registration_service = RegistrationService::new(
            store,
            dues_service.clone(),
            limit_service.clone(),
            status_service.clone(),
            config,
        );

        Backend {
            dues_service,
            limit_service,
            status_service,
            registration_service,
        }
    }
}
