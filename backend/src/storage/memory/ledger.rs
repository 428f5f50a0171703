use async_trait::async_trait;
use shared::Transaction;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::storage::traits::{LedgerError, TransactionLedger};

/// Append-only in-memory ledger keyed by debitor.
#[derive(Default)]
pub struct InMemoryLedger {
    transactions: Mutex<HashMap<u64, Vec<Transaction>>>,
    unavailable: AtomicBool,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails with [`LedgerError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of transactions recorded for a debitor.
    pub async fn transaction_count(&self, debitor_id: u64) -> usize {
        self.transactions
            .lock()
            .await
            .get(&debitor_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    fn check_available(&self) -> Result<(), LedgerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable(anyhow::anyhow!(
                "in-memory ledger switched off"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionLedger for InMemoryLedger {
    async fn list_transactions(&self, debitor_id: u64) -> Result<Vec<Transaction>, LedgerError> {
        self.check_available()?;
        self.transactions
            .lock()
            .await
            .get(&debitor_id)
            .cloned()
            .ok_or(LedgerError::DebitorNotFound(debitor_id))
    }

    async fn append_transaction(&self, transaction: &Transaction) -> Result<(), LedgerError> {
        self.check_available()?;
        let mut stored = transaction.clone();
        if stored.transaction_identifier.is_none() {
            stored.transaction_identifier = Some(Uuid::new_v4().to_string());
        }
        debug!(
            "Ledger append for debitor {}: {:?} {} cents",
            stored.debitor_id, stored.transaction_type, stored.amount.gross_cent
        );
        self.transactions
            .lock()
            .await
            .entry(stored.debitor_id)
            .or_default()
            .push(stored);
        Ok(())
    }
}
