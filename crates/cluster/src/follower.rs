use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use mcall_core::record::timestamp_now;
use mcall_core::{Batch, Context};
use mcall_engine::{EngineConfig, execute_batch};

use crate::distributor::TaskData;
use crate::store::{ClaimRecord, CoordStore, StoreError};

/// How often a follower polls for claims addressed to it.
pub const POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Follower role: polls for claims addressed to this replica, executes each
/// through the single-item batch path, and commits completion back to the
/// store. Runs on every replica, leader included.
pub struct TaskWorker {
    store: Arc<dyn CoordStore>,
    identity: String,
    ctx: Arc<Context>,
    engine: EngineConfig,
}

impl TaskWorker {
    pub fn new(
        store: Arc<dyn CoordStore>,
        identity: String,
        ctx: Arc<Context>,
        engine: EngineConfig,
    ) -> Self {
        Self {
            store,
            identity,
            ctx,
            engine,
        }
    }

    /// Polls until shutdown. Tick failures are logged; the next tick retries.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = ticker.tick() => {}
            }
            if let Err(err) = self.tick().await {
                tracing::warn!(error = %err, "task worker tick failed");
            }
        }
    }

    /// One poll: list claims assigned to this replica and execute the
    /// unprocessed ones. Per-claim errors never abort the tick.
    pub async fn tick(&self) -> Result<(), StoreError> {
        let claims = self.store.list_claims(Some(&self.identity)).await?;
        for claim in claims {
            if claim.is_processed() {
                continue;
            }
            let id = claim.id.clone();
            if let Err(err) = self.process(claim).await {
                tracing::warn!(claim = %id, error = %err, "claim execution failed");
            }
        }
        Ok(())
    }

    async fn process(&self, claim: ClaimRecord) -> anyhow::Result<()> {
        // Commit an in-progress marker first; the CAS loser of a concurrent
        // tick backs off instead of executing the claim a second time.
        let mut marked = claim.clone();
        marked.mark_in_progress(&timestamp_now());
        let mut claim = match self.store.update_claim(&marked).await {
            Ok(claim) => claim,
            Err(StoreError::Conflict) => {
                tracing::debug!(claim = %claim.id, "claim already picked up elsewhere");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        let raw = claim
            .task_data()
            .ok_or_else(|| anyhow::anyhow!("claim {} has no task-data", claim.id))?
            .to_string();
        let task: TaskData = serde_json::from_str(&raw)?;

        let output = execute_batch(
            self.ctx.clone(),
            &self.engine,
            Batch::new(vec![task.item]),
        )
        .await?;
        for record in &output.records {
            tracing::info!(
                task = %task.id,
                input = %record.input,
                error_code = %record.error_code,
                "claim executed"
            );
        }

        claim.mark_processed(&self.identity, &timestamp_now());
        self.store.update_claim(&claim).await?;
        Ok(())
    }
}
