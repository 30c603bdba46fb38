use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Label carried by every mcall store object.
pub const LABEL_PROJECT: &str = "project";
/// Label marking claim objects.
pub const LABEL_TASK: &str = "task";
/// Label addressing a claim to one follower.
pub const LABEL_ASSIGNED_TO: &str = "assigned-to";
/// The project label value.
pub const PROJECT_NAME: &str = "mcall";

/// Annotation holding the serialized task.
pub const ANNOTATION_TASK_DATA: &str = "task-data";
/// Annotation flipped to `"true"` once a claim completed.
pub const ANNOTATION_PROCESSED: &str = "processed";
/// Annotation with the completion time (RFC-3339).
pub const ANNOTATION_PROCESSED_AT: &str = "processed-at";
/// Annotation with the identity of the executing replica.
pub const ANNOTATION_PROCESSED_BY: &str = "processed-by";
/// CAS-guarded execution marker written before a follower starts a claim.
pub const ANNOTATION_IN_PROGRESS: &str = "in-progress";

/// A coordination-store failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object already exists")]
    AlreadyExists,
    #[error("object not found")]
    NotFound,
    #[error("write conflict (stale resource version)")]
    Conflict,
    #[error("store backend: {0}")]
    Backend(String),
}

/// A labelled store object addressing one task to one follower.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClaimRecord {
    /// Store object name, unique per emission.
    pub id: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    /// Store-assigned CAS token; updates supply the observed version and
    /// fail with [`StoreError::Conflict`] on mismatch.
    pub resource_version: String,
}

impl ClaimRecord {
    /// A fresh claim addressing `task_data` to `assigned_to`.
    pub fn new(id: String, assigned_to: &str, task_data: String) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_PROJECT.to_string(), PROJECT_NAME.to_string());
        labels.insert(LABEL_TASK.to_string(), "true".to_string());
        labels.insert(LABEL_ASSIGNED_TO.to_string(), assigned_to.to_string());

        let mut annotations = BTreeMap::new();
        annotations.insert(ANNOTATION_TASK_DATA.to_string(), task_data);

        Self {
            id,
            labels,
            annotations,
            resource_version: String::new(),
        }
    }

    /// The follower this claim is addressed to.
    pub fn assigned_to(&self) -> Option<&str> {
        self.labels.get(LABEL_ASSIGNED_TO).map(String::as_str)
    }

    /// The serialized task payload.
    pub fn task_data(&self) -> Option<&str> {
        self.annotations.get(ANNOTATION_TASK_DATA).map(String::as_str)
    }

    /// Whether the claim has completed.
    pub fn is_processed(&self) -> bool {
        self.annotations.get(ANNOTATION_PROCESSED).map(String::as_str) == Some("true")
    }

    /// Completion time, when recorded and parseable.
    pub fn processed_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.annotations.get(ANNOTATION_PROCESSED_AT)?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|ts| ts.with_timezone(&Utc))
    }

    /// Marks the claim as being executed; committed via a CAS update.
    pub fn mark_in_progress(&mut self, now: &str) {
        self.annotations
            .insert(ANNOTATION_IN_PROGRESS.to_string(), now.to_string());
    }

    /// Marks the claim completed by `identity` at `now`.
    pub fn mark_processed(&mut self, identity: &str, now: &str) {
        self.annotations
            .insert(ANNOTATION_PROCESSED.to_string(), "true".to_string());
        self.annotations
            .insert(ANNOTATION_PROCESSED_AT.to_string(), now.to_string());
        self.annotations
            .insert(ANNOTATION_PROCESSED_BY.to_string(), identity.to_string());
    }
}

/// The single named lease object backing leader election.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LeaseRecord {
    pub name: String,
    /// Current holder identity; empty means released.
    pub holder: String,
    /// Unix seconds of the current holder's acquisition.
    pub acquired_at: i64,
    /// Unix seconds of the last renewal.
    pub renewed_at: i64,
    pub lease_duration_secs: u64,
    /// Monotonic acquire sequence.
    pub transitions: u32,
    /// Store-assigned CAS token, as on [`ClaimRecord`].
    pub resource_version: String,
}

impl LeaseRecord {
    /// Whether the lease has gone unrenewed past its duration at `now`.
    pub fn expired(&self, now: i64) -> bool {
        now - self.renewed_at > self.lease_duration_secs as i64
    }
}

/// The coordination store: labelled objects with list/create/update/delete
/// plus the strongly consistent lease. Updates are compare-and-swap on the
/// object's resource version; everything else is last-writer-wins.
#[async_trait]
pub trait CoordStore: Send + Sync {
    /// Identities of the Running mcall replicas (self included).
    async fn list_peers(&self) -> Result<Vec<String>, StoreError>;

    /// Claims labelled `project=mcall, task=true`, optionally narrowed to
    /// one assignee.
    async fn list_claims(&self, assigned_to: Option<&str>) -> Result<Vec<ClaimRecord>, StoreError>;

    async fn create_claim(&self, claim: &ClaimRecord) -> Result<ClaimRecord, StoreError>;

    /// CAS update; fails with [`StoreError::Conflict`] on a stale version.
    async fn update_claim(&self, claim: &ClaimRecord) -> Result<ClaimRecord, StoreError>;

    async fn delete_claim(&self, id: &str) -> Result<(), StoreError>;

    async fn get_lease(&self, name: &str) -> Result<Option<LeaseRecord>, StoreError>;

    async fn create_lease(&self, lease: &LeaseRecord) -> Result<LeaseRecord, StoreError>;

    /// CAS update; fails with [`StoreError::Conflict`] on a stale version.
    async fn update_lease(&self, lease: &LeaseRecord) -> Result<LeaseRecord, StoreError>;
}
