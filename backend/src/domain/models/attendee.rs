//! Domain model for a registered attendee.
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Admin-only information attached to a registration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdminInfo {
    /// Admin-only flags such as the guest override
    pub flags: BTreeSet<String>,
    /// Operational permission grants such as "regdesk"
    pub permissions: BTreeSet<String>,
    /// Manually set dues in cents, `0` means none
    pub manual_dues: i64,
    pub manual_dues_description: String,
}

/// The ledger-derived figures cached on the attendee record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedBalances {
    pub total_dues: i64,
    pub payment_balance: i64,
    pub open_balance: i64,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attendee {
    /// Assigned by the store on registration
    pub id: u64,
    pub nickname: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    /// Login subject that owns this registration
    pub identity: String,
    pub zip: String,
    /// Selected packages with their booked counts
    pub packages: BTreeMap<String, u32>,
    pub admin_info: AdminInfo,
    pub cache_total_dues: i64,
    pub cache_payment_balance: i64,
    pub cache_open_balance: i64,
    pub cache_due_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl Attendee {
    pub fn package_count(&self, code: &str) -> u32 {
        self.packages.get(code).copied().unwrap_or(0)
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.admin_info.flags.contains(flag)
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.admin_info.permissions.contains(permission)
    }

    pub fn cached_balances(&self) -> CachedBalances {
        CachedBalances {
            total_dues: self.cache_total_dues,
            payment_balance: self.cache_payment_balance,
            open_balance: self.cache_open_balance,
            due_date: self.cache_due_date,
        }
    }

    pub fn set_cached_balances(&mut self, balances: CachedBalances) {
        self.cache_total_dues = balances.total_dues;
        self.cache_payment_balance = balances.payment_balance;
        self.cache_open_balance = balances.open_balance;
        self.cache_due_date = balances.due_date;
    }

    fn deletion_suffix(&self) -> String {
        format!("_d_{}", self.id)
    }

    /// Frees the identity and zip uniqueness constraints for re-registration.
    ///
    /// Returns true if any field changed.
    pub fn mark_deleted(&mut self) -> bool {
        let suffix = self.deletion_suffix();
        let mut changed = false;
        for field in [&mut self.identity, &mut self.zip] {
            if !field.ends_with(&suffix) {
                field.push_str(&suffix);
                changed = true;
            }
        }
        changed
    }

    /// Reverses [`Attendee::mark_deleted`]. Returns true if any field changed.
    pub fn unmark_deleted(&mut self) -> bool {
        let suffix = self.deletion_suffix();
        let mut changed = false;
        for field in [&mut self.identity, &mut self.zip] {
            if field.ends_with(&suffix) {
                let keep = field.len() - suffix.len();
                field.truncate(keep);
                changed = true;
            }
        }
        changed
    }
}
