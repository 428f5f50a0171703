use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::{AttendeeStatus, Count, StatusChange};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

use crate::domain::models::attendee::Attendee as DomainAttendee;
use crate::storage::traits::AttendeeStore;

#[derive(Default)]
struct StoreState {
    next_id: u64,
    attendees: BTreeMap<u64, DomainAttendee>,
    status_changes: Vec<StatusChange>,
    counts: HashMap<(String, String), Count>,
}

impl StoreState {
    fn current_status(&self, attendee_id: u64) -> AttendeeStatus {
        self.status_changes
            .iter()
            .rev()
            .find(|c| c.attendee_id == attendee_id)
            .map(|c| c.status)
            .unwrap_or(AttendeeStatus::New)
    }
}

/// In-memory attendee, status history and count storage.
#[derive(Default)]
pub struct InMemoryAttendeeStore {
    state: Mutex<StoreState>,
}

impl InMemoryAttendeeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn count_key(area: &str, name: &str) -> (String, String) {
    (area.to_string(), name.to_string())
}

#[async_trait]
impl AttendeeStore for InMemoryAttendeeStore {
    async fn add_attendee(&self, attendee: &DomainAttendee) -> Result<u64> {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = state.next_id;
        let mut stored = attendee.clone();
        stored.id = id;
        state.attendees.insert(id, stored);
        Ok(id)
    }

    async fn get_attendee(&self, attendee_id: u64) -> Result<Option<DomainAttendee>> {
        Ok(self.state.lock().await.attendees.get(&attendee_id).cloned())
    }

    async fn update_attendee(&self, attendee: &DomainAttendee) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.attendees.get_mut(&attendee.id) {
            Some(existing) => {
                *existing = attendee.clone();
                Ok(())
            }
            None => Err(anyhow!("Attendee not found: {}", attendee.id)),
        }
    }

    async fn find_attendees_by_identity(&self, identity: &str) -> Result<Vec<DomainAttendee>> {
        Ok(self
            .state
            .lock()
            .await
            .attendees
            .values()
            .filter(|a| a.identity == identity)
            .cloned()
            .collect())
    }

    async fn list_attendees_with_package(
        &self,
        package_code: &str,
    ) -> Result<Vec<(DomainAttendee, AttendeeStatus)>> {
        let state = self.state.lock().await;
        Ok(state
            .attendees
            .values()
            .filter(|a| a.package_count(package_code) > 0)
            .map(|a| (a.clone(), state.current_status(a.id)))
            .collect())
    }

    async fn add_status_change(&self, change: &StatusChange) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.attendees.contains_key(&change.attendee_id) {
            return Err(anyhow!("Attendee not found: {}", change.attendee_id));
        }
        state.status_changes.push(change.clone());
        Ok(())
    }

    async fn list_status_changes(&self, attendee_id: u64) -> Result<Vec<StatusChange>> {
        Ok(self
            .state
            .lock()
            .await
            .status_changes
            .iter()
            .filter(|c| c.attendee_id == attendee_id)
            .cloned()
            .collect())
    }

    async fn init_count(&self, area: &str, name: &str) -> Result<()> {
        self.state
            .lock()
            .await
            .counts
            .entry(count_key(area, name))
            .or_insert_with(|| Count::new(area, name));
        Ok(())
    }

    async fn get_count(&self, area: &str, name: &str) -> Result<Count> {
        self.state
            .lock()
            .await
            .counts
            .get(&count_key(area, name))
            .cloned()
            .ok_or_else(|| anyhow!("Count {}/{} was never initialized", area, name))
    }

    async fn add_count(&self, delta: &Count) -> Result<Count> {
        let mut state = self.state.lock().await;
        let count = state
            .counts
            .get_mut(&count_key(&delta.area, &delta.name))
            .ok_or_else(|| anyhow!("Count {}/{} was never initialized", delta.area, delta.name))?;
        count.pending += delta.pending;
        count.attending += delta.attending;
        Ok(count.clone())
    }

    async fn reset_count(&self, count: &Count) -> Result<()> {
        self.state
            .lock()
            .await
            .counts
            .insert(count_key(&count.area, &count.name), count.clone());
        Ok(())
    }
}
