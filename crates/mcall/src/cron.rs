use std::sync::Arc;

use chrono::Utc;
use croner::parser::{CronParser, Seconds};
use tokio::sync::watch;

use mcall_core::{Batch, Context};
use mcall_engine::{EngineConfig, execute_batch};

/// Re-runs the configured batch on the cron schedule until shutdown.
/// Seconds are optional in the rule (both 5- and 6-field expressions work).
pub async fn run(
    ctx: Arc<Context>,
    engine: EngineConfig,
    batch: Batch,
    rule: &str,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let cron = CronParser::builder()
        .seconds(Seconds::Optional)
        .build()
        .parse(rule)
        .map_err(|err| anyhow::anyhow!("invalid cron rule {rule:?}: {err}"))?;

    loop {
        let now = Utc::now();
        let next = cron
            .find_next_occurrence(&now, false)
            .map_err(|err| anyhow::anyhow!("cron rule {rule:?} has no next occurrence: {err}"))?;
        let wait = (next - now).to_std().unwrap_or_default();
        tracing::debug!(at = %next, "next scheduled batch");

        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            _ = tokio::time::sleep(wait) => {}
        }

        match execute_batch(ctx.clone(), &engine, batch.clone()).await {
            Ok(output) => {
                let failed = output
                    .records
                    .iter()
                    .filter(|record| !record.passed())
                    .count();
                tracing::info!(
                    items = output.records.len(),
                    failed,
                    "scheduled batch completed"
                );
                if batch.exit_on_failure && output.any_failed {
                    tracing::error!("scheduled batch failed with exit-on-failure set");
                    std::process::exit(1);
                }
            }
            Err(err) => tracing::error!(error = %err, "scheduled batch failed to run"),
        }
    }
}
