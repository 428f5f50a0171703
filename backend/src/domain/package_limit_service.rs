//! Capacity accounting for limited packages.
//!
//! Every package with a non-zero `limit` has a count row in the `pkg` area.
//! Attendees holding the package are counted as pending while they wait for
//! approval and as attending once approved. Counts are maintained through
//! deltas applied with the store's atomic add and can be rebuilt from the
//! attendee records at any time.

use shared::{AttendeeStatus, Count};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{ConfigSnapshot, RegistrationConfig};
use crate::domain::errors::{RegistrationError, RegistrationResult};
use crate::storage::AttendeeStore;

pub const PACKAGE_COUNT_AREA: &str = "pkg";

pub fn pending_multiplier(status: AttendeeStatus) -> i64 {
    match status {
        AttendeeStatus::New | AttendeeStatus::Waiting => 1,
        _ => 0,
    }
}

pub fn attending_multiplier(status: AttendeeStatus) -> i64 {
    match status {
        AttendeeStatus::Approved
        | AttendeeStatus::PartiallyPaid
        | AttendeeStatus::Paid
        | AttendeeStatus::CheckedIn => 1,
        _ => 0,
    }
}

/// Count changes caused by moving from one package selection and status to
/// another. Only limited packages with a non-zero change are returned.
pub fn count_deltas(
    old_packages: &BTreeMap<String, u32>,
    new_packages: &BTreeMap<String, u32>,
    old_status: AttendeeStatus,
    new_status: AttendeeStatus,
    config: &RegistrationConfig,
) -> Vec<Count> {
    config
        .limited_packages()
        .filter_map(|package| {
            let old_count = i64::from(old_packages.get(&package.code).copied().unwrap_or(0));
            let new_count = i64::from(new_packages.get(&package.code).copied().unwrap_or(0));

            let mut delta = Count::new(PACKAGE_COUNT_AREA, &package.code);
            delta.attending = new_count * attending_multiplier(new_status)
                - old_count * attending_multiplier(old_status);
            delta.pending =
                new_count * pending_multiplier(new_status) - old_count * pending_multiplier(old_status);
            (!delta.is_zero()).then_some(delta)
        })
        .collect()
}

fn negated(delta: &Count) -> Count {
    let mut reverse = Count::new(&delta.area, &delta.name);
    reverse.pending = -delta.pending;
    reverse.attending = -delta.attending;
    reverse
}

#[derive(Clone)]
pub struct PackageLimitService {
    store: Arc<dyn AttendeeStore>,
    config: ConfigSnapshot,
}

impl PackageLimitService {
    pub fn new(store: Arc<dyn AttendeeStore>, config: ConfigSnapshot) -> Self {
        Self { store, config }
    }

    fn limit_of(&self, name: &str) -> i64 {
        self.config
            .package(name)
            .map(|p| i64::from(p.limit))
            .unwrap_or(0)
    }

    fn exceeds(&self, count: &Count, delta: &Count) -> bool {
        let limit = self.limit_of(&count.name);
        limit > 0 && delta.total() > 0 && count.total() > limit
    }

    /// Compute the count deltas for a change and check them against the
    /// stored counts. Nothing is written.
    ///
    /// Only deltas that increase occupancy can overrun, so an overbooked
    /// package can always be released.
    pub async fn would_exceed_limit(
        &self,
        old_packages: &BTreeMap<String, u32>,
        new_packages: &BTreeMap<String, u32>,
        old_status: AttendeeStatus,
        new_status: AttendeeStatus,
    ) -> RegistrationResult<Vec<Count>> {
        let deltas = count_deltas(old_packages, new_packages, old_status, new_status, &self.config);
        for delta in &deltas {
            let mut projected = self.store.get_count(&delta.area, &delta.name).await?;
            projected.pending += delta.pending;
            projected.attending += delta.attending;
            if self.exceeds(&projected, delta) {
                debug!(
                    "Package {} would exceed its limit: {} pending, {} attending",
                    delta.name, projected.pending, projected.attending
                );
                return Err(RegistrationError::Overrun {
                    area: delta.area.clone(),
                    name: delta.name.clone(),
                });
            }
        }
        Ok(deltas)
    }

    /// Apply deltas through the store's atomic add.
    ///
    /// The counts returned by the store are checked again, so a concurrent
    /// booking that slipped in between check and apply is caught. On overrun
    /// or store failure every delta applied so far is reverted.
    pub async fn apply_deltas(&self, deltas: &[Count]) -> RegistrationResult<()> {
        let mut applied: Vec<Count> = Vec::new();
        for delta in deltas {
            let after = match self.store.add_count(delta).await {
                Ok(after) => after,
                Err(e) => {
                    self.revert_deltas(&applied).await;
                    return Err(e.into());
                }
            };
            applied.push(delta.clone());
            if self.exceeds(&after, delta) {
                warn!(
                    "Concurrent booking pushed package {} over its limit, reverting",
                    delta.name
                );
                self.revert_deltas(&applied).await;
                return Err(RegistrationError::Overrun {
                    area: delta.area.clone(),
                    name: delta.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Undo previously applied deltas. Failures are logged, the counts can be
    /// repaired with [`PackageLimitService::recalculate_limit`].
    pub async fn revert_deltas(&self, deltas: &[Count]) {
        for delta in deltas.iter().rev() {
            if let Err(e) = self.store.add_count(&negated(delta)).await {
                warn!("Failed to revert count delta for package {}: {}", delta.name, e);
            }
        }
    }

    /// Check and apply in one go. Returns the applied deltas so that the
    /// caller can revert them if a later step fails.
    pub async fn reserve(
        &self,
        old_packages: &BTreeMap<String, u32>,
        new_packages: &BTreeMap<String, u32>,
        old_status: AttendeeStatus,
        new_status: AttendeeStatus,
    ) -> RegistrationResult<Vec<Count>> {
        let deltas = self
            .would_exceed_limit(old_packages, new_packages, old_status, new_status)
            .await?;
        self.apply_deltas(&deltas).await?;
        Ok(deltas)
    }

    /// Rebuild the count for one package from the attendee records.
    pub async fn recalculate_limit(&self, package_code: &str) -> RegistrationResult<Count> {
        if self.config.package(package_code).is_none() {
            return Err(RegistrationError::InvalidPackage(package_code.to_string()));
        }

        let mut actual = Count::new(PACKAGE_COUNT_AREA, package_code);
        for (attendee, status) in self.store.list_attendees_with_package(package_code).await? {
            let held = i64::from(attendee.package_count(package_code));
            actual.pending += held * pending_multiplier(status);
            actual.attending += held * attending_multiplier(status);
        }

        match self.store.get_count(PACKAGE_COUNT_AREA, package_code).await {
            Ok(stored) if stored == actual => {
                debug!("Count for package {} is consistent", package_code);
                return Ok(actual);
            }
            Ok(stored) => warn!(
                "Count drift for package {}: stored {}/{} but recalculated {}/{} (pending/attending)",
                package_code, stored.pending, stored.attending, actual.pending, actual.attending
            ),
            Err(e) => warn!("Count for package {} unreadable, rebuilding: {}", package_code, e),
        }

        self.store.reset_count(&actual).await?;
        info!(
            "Reset count for package {} to {}/{}",
            package_code, actual.pending, actual.attending
        );
        Ok(actual)
    }

    pub async fn recalculate_all_limits(&self) -> RegistrationResult<Vec<Count>> {
        let mut counts = Vec::new();
        for package in self.config.limited_packages() {
            counts.push(self.recalculate_limit(&package.code).await?);
        }
        Ok(counts)
    }

    /// Create zeroed count rows for every limited package.
    pub async fn provision_counts(&self) -> RegistrationResult<()> {
        for package in self.config.limited_packages() {
            self.store.init_count(PACKAGE_COUNT_AREA, &package.code).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::test_utils::{sample_attendee, test_config, TestHelper};

    fn packages(entries: &[(&str, u32)]) -> BTreeMap<String, u32> {
        entries.iter().map(|(c, n)| (c.to_string(), *n)).collect()
    }

    async fn set_count(helper: &TestHelper, pending: i64, attending: i64) {
        let mut count = Count::new(PACKAGE_COUNT_AREA, "stage");
        count.pending = pending;
        count.attending = attending;
        helper.store.reset_count(&count).await.unwrap();
    }

    #[test]
    fn test_multipliers() {
        for status in AttendeeStatus::ALL {
            assert!(pending_multiplier(status) + attending_multiplier(status) <= 1);
        }
        assert_eq!(pending_multiplier(AttendeeStatus::Waiting), 1);
        assert_eq!(attending_multiplier(AttendeeStatus::CheckedIn), 1);
        assert_eq!(pending_multiplier(AttendeeStatus::Cancelled), 0);
        assert_eq!(attending_multiplier(AttendeeStatus::Cancelled), 0);
    }

    #[test]
    fn test_deltas_ignore_unlimited_packages() {
        let config = test_config();
        let deltas = count_deltas(
            &BTreeMap::new(),
            &packages(&[("attendance", 1), ("stage", 2)]),
            AttendeeStatus::New,
            AttendeeStatus::New,
            &config,
        );
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].name, "stage");
        assert_eq!((deltas[0].pending, deltas[0].attending), (2, 0));
    }

    #[test]
    fn test_approval_moves_pending_to_attending() {
        let config = test_config();
        let held = packages(&[("stage", 1)]);
        let deltas = count_deltas(&held, &held, AttendeeStatus::New, AttendeeStatus::Approved, &config);
        assert_eq!((deltas[0].pending, deltas[0].attending), (-1, 1));

        let unchanged =
            count_deltas(&held, &held, AttendeeStatus::Approved, AttendeeStatus::Paid, &config);
        assert!(unchanged.is_empty());
    }

    #[tokio::test]
    async fn test_full_package_rejects_booking_without_mutation() {
        let helper = TestHelper::with_counts().await;
        set_count(&helper, 2, 2).await;

        let held = packages(&[("stage", 1)]);
        let err = helper
            .limit_service
            .reserve(&BTreeMap::new(), &held, AttendeeStatus::Approved, AttendeeStatus::Approved)
            .await
            .unwrap_err();

        assert!(matches!(err, RegistrationError::Overrun { ref name, .. } if name == "stage"));
        let count = helper.store.get_count(PACKAGE_COUNT_AREA, "stage").await.unwrap();
        assert_eq!((count.pending, count.attending), (2, 2));
    }

    #[tokio::test]
    async fn test_full_package_still_allows_approval() {
        let helper = TestHelper::with_counts().await;
        set_count(&helper, 2, 2).await;

        let held = packages(&[("stage", 1)]);
        helper
            .limit_service
            .reserve(&held, &held, AttendeeStatus::New, AttendeeStatus::Approved)
            .await
            .unwrap();

        let count = helper.store.get_count(PACKAGE_COUNT_AREA, "stage").await.unwrap();
        assert_eq!((count.pending, count.attending), (1, 3));
    }

    #[tokio::test]
    async fn test_overbooked_package_can_be_released() {
        let helper = TestHelper::with_counts().await;
        set_count(&helper, 0, 6).await;

        helper
            .limit_service
            .reserve(
                &packages(&[("stage", 1)]),
                &BTreeMap::new(),
                AttendeeStatus::Paid,
                AttendeeStatus::Paid,
            )
            .await
            .unwrap();
        let count = helper.store.get_count(PACKAGE_COUNT_AREA, "stage").await.unwrap();
        assert_eq!(count.attending, 5);
    }

    #[tokio::test]
    async fn test_apply_reverts_when_counts_moved_underneath() {
        let helper = TestHelper::with_counts().await;
        let held = packages(&[("stage", 1)]);
        let deltas = helper
            .limit_service
            .would_exceed_limit(&BTreeMap::new(), &held, AttendeeStatus::New, AttendeeStatus::New)
            .await
            .unwrap();

        // another booking fills the package before ours is applied
        set_count(&helper, 4, 0).await;
        let err = helper.limit_service.apply_deltas(&deltas).await.unwrap_err();

        assert!(matches!(err, RegistrationError::Overrun { .. }));
        let count = helper.store.get_count(PACKAGE_COUNT_AREA, "stage").await.unwrap();
        assert_eq!(count.pending, 4);
    }

    #[tokio::test]
    async fn test_recalculate_repairs_drift() {
        let helper = TestHelper::with_counts().await;
        let mut pending = sample_attendee();
        pending.packages.insert("stage".to_string(), 1);
        helper.store.add_attendee(&pending).await.unwrap();
        let approved_id = helper.store.add_attendee(&pending).await.unwrap();
        helper.set_status(approved_id, AttendeeStatus::Approved).await;
        let cancelled_id = helper.store.add_attendee(&pending).await.unwrap();
        helper.set_status(cancelled_id, AttendeeStatus::Cancelled).await;
        set_count(&helper, 3, 3).await;

        let repaired = helper.limit_service.recalculate_limit("stage").await.unwrap();

        assert_eq!((repaired.pending, repaired.attending), (1, 1));
        let stored = helper.store.get_count(PACKAGE_COUNT_AREA, "stage").await.unwrap();
        assert_eq!(stored, repaired);
    }

    #[tokio::test]
    async fn test_recalculate_all_covers_limited_packages() {
        let helper = TestHelper::with_counts().await;
        let counts = helper.limit_service.recalculate_all_limits().await.unwrap();
        assert_eq!(counts.len(), 1);
        assert!(counts[0].is_zero());
    }

    #[tokio::test]
    async fn test_recalculate_unknown_package() {
        let helper = TestHelper::new();
        assert!(matches!(
            helper.limit_service.recalculate_limit("tardis").await,
            Err(RegistrationError::InvalidPackage(_))
        ));
    }
}
