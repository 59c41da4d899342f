// services/poller.rs
use std::time::Duration;

use mongodb::bson::oid::ObjectId;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::Result;
use crate::models::transaction::Transaction;
use crate::services::ledger::TransactionStore;

#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    // two minutes of polling, the window a user gets to enter their PIN
    fn default() -> Self {
        PollConfig {
            interval: Duration::from_secs(5),
            max_attempts: 24,
        }
    }
}

#[derive(Debug)]
pub enum PollOutcome {
    /// A terminal status was observed within the attempt budget.
    Terminal(Transaction),
    /// Budget exhausted while still pending. Distinct from a failed payment:
    /// server state is untouched and a late callback can still resolve it.
    TimedOut,
    Cancelled,
}

/// Repeatedly reads a transaction until it turns terminal, the attempt budget
/// runs out, or the caller cancels. Read-only against the store; never
/// mutates the row it watches.
pub async fn poll_until_terminal(
    store: &dyn TransactionStore,
    id: &ObjectId,
    config: PollConfig,
    cancel: &CancellationToken,
) -> Result<PollOutcome> {
    let mut ticker = tokio::time::interval(config.interval);
    for attempt in 1..=config.max_attempts {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(PollOutcome::Cancelled),
            _ = ticker.tick() => {}
        }

        if let Some(tx) = store.find_by_id(id).await? {
            if tx.status.is_terminal() {
                return Ok(PollOutcome::Terminal(tx));
            }
        }
        debug!("transaction {} still pending after attempt {}", id, attempt);
    }
    Ok(PollOutcome::TimedOut)
}
