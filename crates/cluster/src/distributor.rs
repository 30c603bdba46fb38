use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use mcall_core::WorkItem;

use crate::store::{ClaimRecord, CoordStore};

/// How often the leader re-emits the configured task set.
pub const DISTRIBUTION_INTERVAL: Duration = Duration::from_secs(300);
/// How long processed claims are retained before garbage collection.
pub const CLAIM_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// The claim payload: a work item plus its stable per-round task id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskData {
    /// `task-<index>` within the configured task set.
    pub id: String,
    /// The work item itself.
    #[serde(flatten)]
    pub item: WorkItem,
}

/// Leader role: enumerates the configured task set and addresses each task
/// to one follower via a claim in the coordination store. The leader never
/// executes tasks itself.
pub struct Distributor {
    store: Arc<dyn CoordStore>,
    identity: String,
    items: Vec<WorkItem>,
}

impl Distributor {
    pub fn new(store: Arc<dyn CoordStore>, identity: String, items: Vec<WorkItem>) -> Self {
        Self {
            store,
            identity,
            items,
        }
    }

    /// Emits the task set immediately on gaining leadership, then every
    /// [`DISTRIBUTION_INTERVAL`] until leadership lapses or shutdown.
    pub async fn run(&self, mut leadership: watch::Receiver<bool>, mut shutdown: watch::Receiver<bool>) {
        loop {
            while !*leadership.borrow() {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    changed = leadership.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }

            while *leadership.borrow() {
                if let Err(err) = self.run_round().await {
                    tracing::warn!(error = %err, "task distribution round failed");
                }
                tokio::select! {
                    _ = shutdown.changed() => return,
                    changed = leadership.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                    _ = tokio::time::sleep(DISTRIBUTION_INTERVAL) => {}
                }
            }
        }
    }

    /// One distribution round: discover followers, emit one claim per task
    /// (round-robin by task index), then garbage-collect old processed
    /// claims. Individual claim failures are logged and skipped.
    pub async fn run_round(&self) -> anyhow::Result<()> {
        let now = Utc::now();
        let followers: Vec<String> = self
            .store
            .list_peers()
            .await?
            .into_iter()
            .filter(|peer| peer != &self.identity)
            .collect();

        let tasks = self.tasks();
        if followers.is_empty() {
            tracing::info!(tasks = tasks.len(), "no running followers; tasks not assigned");
        } else {
            for (index, task) in tasks.iter().enumerate() {
                let follower = &followers[index % followers.len()];
                let claim = match build_claim(follower, index, task, now) {
                    Ok(claim) => claim,
                    Err(err) => {
                        tracing::warn!(task = %task.id, error = %err, "task serialization failed");
                        continue;
                    }
                };
                match self.store.create_claim(&claim).await {
                    Ok(_) => {
                        tracing::debug!(claim = %claim.id, follower = %follower, "claim created")
                    }
                    Err(err) => {
                        tracing::warn!(claim = %claim.id, error = %err, "claim create failed")
                    }
                }
            }
        }

        self.gc_processed(now).await;
        Ok(())
    }

    fn tasks(&self) -> Vec<TaskData> {
        self.items
            .iter()
            .enumerate()
            .map(|(index, item)| TaskData {
                id: format!("task-{index}"),
                item: item.clone(),
            })
            .collect()
    }

    async fn gc_processed(&self, now: DateTime<Utc>) {
        let claims = match self.store.list_claims(None).await {
            Ok(claims) => claims,
            Err(err) => {
                tracing::warn!(error = %err, "claim listing for gc failed");
                return;
            }
        };

        let cutoff =
            now - chrono::Duration::from_std(CLAIM_RETENTION).unwrap_or_else(|_| chrono::Duration::zero());
        for claim in claims {
            let Some(processed_at) = claim.processed_at() else {
                continue;
            };
            if claim.is_processed() && processed_at < cutoff {
                match self.store.delete_claim(&claim.id).await {
                    Ok(()) => tracing::debug!(claim = %claim.id, "processed claim collected"),
                    Err(err) => {
                        tracing::warn!(claim = %claim.id, error = %err, "claim delete failed")
                    }
                }
            }
        }
    }
}

fn build_claim(
    follower: &str,
    index: usize,
    task: &TaskData,
    now: DateTime<Utc>,
) -> Result<ClaimRecord, serde_json::Error> {
    let data = serde_json::to_string(task)?;
    // The emission id carries the follower, the second, and the task index;
    // the index keeps ids unique when several tasks land on one follower
    // within the same second.
    let id = format!("task-{follower}-{}-{index}", now.timestamp());
    Ok(ClaimRecord::new(id, follower, data))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::{Distributor, TaskData};
    use crate::memory::MemoryStore;
    use crate::store::{ClaimRecord, CoordStore};
    use mcall_core::WorkItem;

    fn items(n: usize) -> Vec<WorkItem> {
        (0..n).map(|i| WorkItem::command(format!("echo {i}"))).collect()
    }

    #[tokio::test]
    async fn tasks_fan_out_round_robin_over_followers() {
        let store = Arc::new(MemoryStore::new());
        store.set_peers(vec![
            "leader".to_string(),
            "f1".to_string(),
            "f2".to_string(),
            "f3".to_string(),
        ]);

        let distributor = Distributor::new(store.clone(), "leader".to_string(), items(3));
        distributor.run_round().await.unwrap();

        let claims = store.list_claims(None).await.unwrap();
        assert_eq!(claims.len(), 3);

        for claim in &claims {
            let task: TaskData = serde_json::from_str(claim.task_data().unwrap()).unwrap();
            let index: usize = task.id.strip_prefix("task-").unwrap().parse().unwrap();
            let expected = format!("f{}", index + 1);
            assert_eq!(claim.assigned_to(), Some(expected.as_str()));
            assert_eq!(task.item.input, format!("echo {index}"));
        }
    }

    #[tokio::test]
    async fn a_round_without_followers_assigns_nothing() {
        let store = Arc::new(MemoryStore::new());
        store.set_peers(vec!["leader".to_string()]);

        let distributor = Distributor::new(store.clone(), "leader".to_string(), items(2));
        distributor.run_round().await.unwrap();
        assert!(store.list_claims(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn old_processed_claims_are_collected() {
        let store = Arc::new(MemoryStore::new());
        store.set_peers(vec!["leader".to_string(), "f1".to_string()]);

        let mut old = ClaimRecord::new("task-f1-0-0".to_string(), "f1", "{}".to_string());
        old.mark_processed("f1", "2000-01-01T00:00:00.000Z");
        let old = store.create_claim(&old).await.unwrap();

        let mut fresh = ClaimRecord::new("task-f1-0-1".to_string(), "f1", "{}".to_string());
        fresh.mark_processed("f1", &Utc::now().to_rfc3339());
        store.create_claim(&fresh).await.unwrap();

        let distributor = Distributor::new(store.clone(), "leader".to_string(), Vec::new());
        distributor.run_round().await.unwrap();

        let remaining = store.list_claims(None).await.unwrap();
        assert!(remaining.iter().all(|claim| claim.id != old.id));
        assert!(remaining.iter().any(|claim| claim.id == "task-f1-0-1"));
    }

    #[test]
    fn task_data_round_trips() {
        let task = TaskData {
            id: "task-0".to_string(),
            item: WorkItem {
                input: "echo hi".to_string(),
                kind: mcall_core::WorkKind::Command,
                name: Some("n".to_string()),
                expect: Some("hi".to_string()),
                remediation: None,
                notify: vec!["ops".to_string()],
                timeout: 9,
            },
        };
        let json = serde_json::to_string(&task).unwrap();
        let back: TaskData = serde_json::from_str(&json).unwrap();
        assert_eq!(back, task);
    }
}
