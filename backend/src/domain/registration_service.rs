//! Registration and admin edits of attendee records.

use shared::AttendeeStatus;
use std::sync::Arc;
use tracing::info;

use crate::config::ConfigSnapshot;
use crate::domain::dues_service::DuesService;
use crate::domain::errors::{RegistrationError, RegistrationResult};
use crate::domain::models::{Attendee, CachedBalances};
use crate::domain::package_limit_service::PackageLimitService;
use crate::domain::status_service::StatusService;
use crate::storage::AttendeeStore;

#[derive(Clone)]
pub struct RegistrationService {
    store: Arc<dyn AttendeeStore>,
    dues_service: DuesService,
    limit_service: PackageLimitService,
    status_service: StatusService,
    config: ConfigSnapshot,
}

impl RegistrationService {
    pub fn new(
        store: Arc<dyn AttendeeStore>,
        dues_service: DuesService,
        limit_service: PackageLimitService,
        status_service: StatusService,
        config: ConfigSnapshot,
    ) -> Self {
        Self {
            store,
            dues_service,
            limit_service,
            status_service,
            config,
        }
    }

    fn validate_packages(&self, attendee: &Attendee) -> RegistrationResult<()> {
        match attendee
            .packages
            .keys()
            .find(|code| self.config.package(code).is_none())
        {
            Some(code) => Err(RegistrationError::InvalidPackage(code.clone())),
            None => Ok(()),
        }
    }

    /// Store a new registration in status `new` and return its id.
    ///
    /// A new attendee owes nothing yet, so the ledger is not consulted and
    /// the cached balances start out empty.
    pub async fn register(&self, attendee: Attendee) -> RegistrationResult<u64> {
        self.validate_packages(&attendee)?;

        let mut attendee = attendee;
        attendee.set_cached_balances(CachedBalances::default());

        let deltas = self
            .limit_service
            .reserve(
                &Default::default(),
                &attendee.packages,
                AttendeeStatus::New,
                AttendeeStatus::New,
            )
            .await?;

        attendee.id = match self.store.add_attendee(&attendee).await {
            Ok(id) => id,
            Err(e) => {
                self.limit_service.revert_deltas(&deltas).await;
                return Err(e.into());
            }
        };

        info!("Registered attendee {} ({})", attendee.id, attendee.nickname);
        Ok(attendee.id)
    }

    /// Replace an attendee's data and packages, keeping status and cached
    /// balances under the domain's control.
    pub async fn update_attendee(&self, attendee: Attendee) -> RegistrationResult<Attendee> {
        let existing = self
            .store
            .get_attendee(attendee.id)
            .await?
            .ok_or(RegistrationError::AttendeeNotFound(attendee.id))?;
        self.validate_packages(&attendee)?;
        let status = self.status_service.current_status(attendee.id).await?;

        let mut updated = attendee;
        updated.created_at = existing.created_at;
        updated.set_cached_balances(existing.cached_balances());

        let deltas = self
            .limit_service
            .reserve(&existing.packages, &updated.packages, status, status)
            .await?;
        if let Err(e) = self.store.update_attendee(&updated).await {
            self.limit_service.revert_deltas(&deltas).await;
            return Err(e.into());
        }

        // The counts now match the stored packages. Reconciliation only moves
        // between payment-driven statuses, which share one count class.
        let reconciliation = self
            .dues_service
            .reconcile(&mut updated, status, status, None)
            .await?;
        if reconciliation.changed {
            self.store.update_attendee(&updated).await?;
        }
        if reconciliation.status != status {
            self.status_service
                .record_status_change(&updated, reconciliation.status, "")
                .await?;
        }

        info!("Updated attendee {}", updated.id);
        Ok(updated)
    }
}
