//! Public API types and the batch orchestrator entry point.

use std::sync::Arc;

use mcall_core::record::timestamp_now;
use mcall_core::{Batch, Config, Context, ERROR_CODE_FAILED, ResultRecord};

use crate::pool::Pool;
use crate::response;

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of pool workers W.
    pub workers: usize,
    /// Capacity of the request queue; submission awaits beyond it.
    pub queue_capacity: usize,
}

impl EngineConfig {
    /// Default pool size.
    pub const DEFAULT_WORKERS: usize = 10;
    /// Default request queue capacity.
    pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

    /// Pool settings from the loaded configuration file.
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            workers: cfg.worker.number,
            queue_capacity: Self::DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: Self::DEFAULT_WORKERS,
            queue_capacity: Self::DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Everything a finished batch produces.
#[derive(Debug, Clone)]
pub struct BatchOutput {
    /// One record per submitted item, in submission order.
    pub records: Vec<ResultRecord>,
    /// The records rendered per the configured format and encoding.
    pub rendered: String,
    /// Whether any item failed (probe or validation).
    pub any_failed: bool,
}

/// Runs one batch to completion: fan the items out over a fresh pool,
/// collect and reorder the results, render them, and forward them to the
/// Elasticsearch sink when one is configured.
///
/// Every submitted item yields exactly one record, in submission order.
/// Probe and validation failures are encoded in the records, never
/// returned as errors.
pub async fn execute_batch(
    ctx: Arc<Context>,
    cfg: &EngineConfig,
    batch: Batch,
) -> anyhow::Result<BatchOutput> {
    let pool = Pool::start(cfg, ctx.clone())?;

    // Fan out fully; submission order is preserved by the order of the
    // reply channels, not by serializing on each result.
    let mut pending = Vec::with_capacity(batch.items.len());
    for item in batch.items {
        let input = item.input.clone();
        let name = item.name.clone();
        pending.push((input, name, pool.submit(item).await));
    }

    let mut records = Vec::with_capacity(pending.len());
    for (input, name, reply) in pending {
        let record = match reply.await {
            Ok(record) => record,
            Err(_) => ResultRecord {
                input,
                name,
                error_code: ERROR_CODE_FAILED.to_string(),
                content: "worker exited before producing a result".to_string(),
                timestamp: timestamp_now(),
                subject: ctx.subject.clone(),
                hostname: Some(ctx.hostname.clone()),
            },
        };
        records.push(record);
    }

    pool.stop();
    pool.wait().await;

    if let Some(es) = &ctx.es {
        if let Err(err) = response::forward_to_es(&pool.runtime().http, es, &records).await {
            tracing::warn!(error = %err, "elasticsearch forwarding failed");
        }
    }

    let rendered = response::render(&records, ctx.format, ctx.encoding);
    let any_failed = records.iter().any(|record| !record.passed());
    Ok(BatchOutput {
        records,
        rendered,
        any_failed,
    })
}
