use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, watch};

use mcall_core::record::timestamp_now;
use mcall_core::{Context, ERROR_CODE_FAILED, ERROR_CODE_OK, ResultRecord, WorkItem, WorkKind};

use crate::dedup::{Claim, Deduplicator, Outcome, await_outcome};
use crate::expect;
use crate::pool::Commander;
use crate::probe;

// Everything one batch's workers share: the context, one HTTP client, and
// the per-batch probe memo.
pub(crate) struct BatchRuntime {
    pub(crate) ctx: Arc<Context>,
    pub(crate) http: reqwest::Client,
    pub(crate) dedup: Deduplicator,
}

impl BatchRuntime {
    pub(crate) fn new(ctx: Arc<Context>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(ctx.insecure_skip_verify)
            .build()?;
        Ok(Self {
            ctx,
            http,
            dedup: Deduplicator::new(),
        })
    }
}

pub(crate) async fn run_worker(
    rx: Arc<Mutex<mpsc::Receiver<Commander>>>,
    mut done: watch::Receiver<bool>,
    runtime: Arc<BatchRuntime>,
) {
    loop {
        let cmd = tokio::select! {
            _ = done.changed() => break,
            cmd = next(&rx) => match cmd {
                Some(cmd) => cmd,
                None => break,
            },
        };
        let record = execute(&runtime, cmd.item).await;
        let _ = cmd.reply.send(record);
    }
}

async fn next(rx: &Arc<Mutex<mpsc::Receiver<Commander>>>) -> Option<Commander> {
    rx.lock().await.recv().await
}

pub(crate) async fn execute(runtime: &BatchRuntime, item: WorkItem) -> ResultRecord {
    let outcome = if item.input.is_empty() {
        Outcome::passed(String::new())
    } else {
        match runtime.dedup.claim(&item.input) {
            Claim::Lead(slot) => {
                let outcome = probe_and_validate(runtime, &item).await;
                slot.publish(outcome.clone());
                outcome
            }
            Claim::Follow(rx) => await_outcome(rx).await,
        }
    };
    into_record(&runtime.ctx, &item, outcome)
}

async fn probe_and_validate(runtime: &BatchRuntime, item: &WorkItem) -> Outcome {
    let timeout = resolve_timeout(item.timeout, runtime.ctx.default_timeout);

    // For commands the combined output is both the record content and what
    // expectations see; for HTTP probes the body is the content but the
    // status code is what expectations see.
    let probed = match item.kind {
        WorkKind::Command => probe::run_shell(&item.input, timeout)
            .await
            .map(|output| (output.clone(), output)),
        WorkKind::HttpGet | WorkKind::HttpPost => {
            probe::run_http(&runtime.http, &item.input, item.kind, timeout)
                .await
                .map(|response| (response.status.to_string(), response.body))
        }
    };

    match probed {
        Ok((gauge, content)) => match expect::evaluate(&gauge, item.expect.as_deref()) {
            Ok(()) => Outcome::passed(content),
            Err(reason) => {
                remediate_and_notify(runtime, item, &reason, timeout).await;
                Outcome::failed(content)
            }
        },
        Err(err) => {
            tracing::debug!(input = %item.input, error = %err, "probe failed");
            Outcome::failed(err.into_content())
        }
    }
}

async fn remediate_and_notify(
    runtime: &BatchRuntime,
    item: &WorkItem,
    reason: &str,
    timeout: Option<Duration>,
) {
    if let Some(command) = &item.remediation {
        if let Err(err) = probe::run_shell(command, timeout).await {
            tracing::warn!(command = %command, error = %err, "remediation command failed");
        }
    }
    let label = item.name.as_deref().unwrap_or(&item.input);
    for receiver in &item.notify {
        runtime.ctx.notifier.notify(receiver, label, reason).await;
    }
}

fn resolve_timeout(timeout: i64, default: Duration) -> Option<Duration> {
    match timeout {
        t if t < 0 => None,
        0 => Some(default),
        t => Some(Duration::from_secs(t as u64)),
    }
}

fn into_record(ctx: &Context, item: &WorkItem, outcome: Outcome) -> ResultRecord {
    ResultRecord {
        input: item.input.clone(),
        name: item.name.clone(),
        error_code: if outcome.passed {
            ERROR_CODE_OK.to_string()
        } else {
            ERROR_CODE_FAILED.to_string()
        },
        content: outcome.content,
        timestamp: timestamp_now(),
        subject: ctx.subject.clone(),
        hostname: Some(ctx.hostname.clone()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{BatchRuntime, execute, resolve_timeout};
    use mcall_core::{Config, Context, WorkItem};
    use std::time::Duration;

    fn runtime() -> BatchRuntime {
        BatchRuntime::new(Arc::new(Context::from_config(&Config::default()))).unwrap()
    }

    #[test]
    fn timeout_resolution() {
        let default = Duration::from_secs(30);
        assert_eq!(resolve_timeout(0, default), Some(default));
        assert_eq!(resolve_timeout(7, default), Some(Duration::from_secs(7)));
        assert_eq!(resolve_timeout(-1, default), None);
    }

    #[tokio::test]
    async fn empty_input_is_a_no_op() {
        let record = execute(&runtime(), WorkItem::command("")).await;
        assert_eq!(record.error_code, "0");
        assert_eq!(record.content, "");
    }

    #[tokio::test]
    async fn expectation_mismatch_keeps_the_captured_output() {
        let mut item = WorkItem::command("echo goodbye");
        item.expect = Some("hello".to_string());
        let record = execute(&runtime(), item).await;
        assert_eq!(record.error_code, "-1");
        assert_eq!(record.content, "goodbye\n");
    }

    #[tokio::test]
    async fn expectation_failure_runs_the_remediation_command() {
        let marker = std::env::temp_dir().join(format!("mcall-remediate-{}", std::process::id()));
        let _ = std::fs::remove_file(&marker);

        let mut item = WorkItem::command("echo goodbye");
        item.expect = Some("hello".to_string());
        item.remediation = Some(format!("touch {}", marker.display()));
        let record = execute(&runtime(), item).await;

        assert_eq!(record.error_code, "-1");
        assert!(marker.exists(), "remediation command did not run");
        let _ = std::fs::remove_file(&marker);
    }

    #[tokio::test]
    async fn record_carries_hostname_and_parseable_timestamp() {
        let mut item = WorkItem::command("echo hi");
        item.name = Some("greet".to_string());
        let record = execute(&runtime(), item).await;
        assert_eq!(record.error_code, "0");
        assert_eq!(record.name.as_deref(), Some("greet"));
        assert!(record.hostname.is_some());
        chrono::DateTime::parse_from_rfc3339(&record.timestamp).unwrap();
    }
}
