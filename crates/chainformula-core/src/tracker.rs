//! Chain state tracker — a process-wide snapshot of the indexer's `State`
//! row, refreshed on a timer so request handling never blocks on it.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::ComputeError;
use crate::store::EventStore;
use crate::types::StateRow;

/// Holds the latest observed chain state. Cheaply cloneable; all clones
/// share the same snapshot.
#[derive(Clone)]
pub struct StateTracker {
    store: Arc<dyn EventStore>,
    snapshot: Arc<RwLock<Option<StateRow>>>,
}

impl StateTracker {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            snapshot: Arc::new(RwLock::new(None)),
        }
    }

    /// Re-read the state row once.
    pub async fn refresh(&self) -> Result<(), ComputeError> {
        let state = self.store.state().await?;
        if let Some(state) = &state {
            debug!(
                chain_id = %state.chain_id,
                height = state.latest_block.height,
                "state snapshot refreshed"
            );
        }
        *self.snapshot.write().unwrap() = state;
        Ok(())
    }

    /// The last observed state, if any refresh has succeeded.
    pub fn latest(&self) -> Option<StateRow> {
        self.snapshot.read().unwrap().clone()
    }

    /// Spawn a background refresh loop with the given cadence (the service
    /// default is ~1 s). Refresh failures are logged and retried on the
    /// next tick.
    pub fn spawn(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(err) = self.refresh().await {
                    warn!(error = %err, "state snapshot refresh failed");
                }
            }
        })
    }
}
