use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::Client;
use kube::api::{Api, DeleteParams, ListParams, PostParams};

use crate::store::{
    ClaimRecord, CoordStore, LABEL_ASSIGNED_TO, LABEL_PROJECT, LABEL_TASK, LeaseRecord,
    PROJECT_NAME, StoreError,
};

/// Kubernetes-backed coordination store: coordination Leases for election,
/// labelled ConfigMaps for claims, and the Pod list for peer discovery.
pub struct KubeStore {
    client: Client,
    namespace: String,
}

impl KubeStore {
    /// Connects with the in-cluster (or local kubeconfig) credentials,
    /// targeting the namespace from `NAMESPACE` (default `default`).
    pub async fn connect() -> anyhow::Result<Self> {
        let client = Client::try_default().await?;
        let namespace = std::env::var("NAMESPACE").unwrap_or_else(|_| "default".to_string());
        Ok(Self { client, namespace })
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn claims(&self) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn leases(&self) -> Api<Lease> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

#[async_trait]
impl CoordStore for KubeStore {
    async fn list_peers(&self) -> Result<Vec<String>, StoreError> {
        let params = ListParams::default().labels(&format!("{LABEL_PROJECT}={PROJECT_NAME}"));
        let pods = self.pods().list(&params).await.map_err(read_err)?;
        Ok(pods
            .items
            .into_iter()
            .filter(|pod| {
                pod.status
                    .as_ref()
                    .and_then(|status| status.phase.as_deref())
                    == Some("Running")
            })
            .filter_map(|pod| pod.metadata.name)
            .collect())
    }

    async fn list_claims(&self, assigned_to: Option<&str>) -> Result<Vec<ClaimRecord>, StoreError> {
        let mut selector = format!("{LABEL_PROJECT}={PROJECT_NAME},{LABEL_TASK}=true");
        if let Some(identity) = assigned_to {
            selector.push_str(&format!(",{LABEL_ASSIGNED_TO}={identity}"));
        }
        let params = ListParams::default().labels(&selector);
        let maps = self.claims().list(&params).await.map_err(read_err)?;
        Ok(maps.items.into_iter().map(claim_from_config_map).collect())
    }

    async fn create_claim(&self, claim: &ClaimRecord) -> Result<ClaimRecord, StoreError> {
        let created = self
            .claims()
            .create(&PostParams::default(), &claim_to_config_map(claim))
            .await
            .map_err(create_err)?;
        Ok(claim_from_config_map(created))
    }

    async fn update_claim(&self, claim: &ClaimRecord) -> Result<ClaimRecord, StoreError> {
        let updated = self
            .claims()
            .replace(&claim.id, &PostParams::default(), &claim_to_config_map(claim))
            .await
            .map_err(update_err)?;
        Ok(claim_from_config_map(updated))
    }

    async fn delete_claim(&self, id: &str) -> Result<(), StoreError> {
        self.claims()
            .delete(id, &DeleteParams::default())
            .await
            .map_err(update_err)?;
        Ok(())
    }

    async fn get_lease(&self, name: &str) -> Result<Option<LeaseRecord>, StoreError> {
        let lease = self.leases().get_opt(name).await.map_err(read_err)?;
        Ok(lease.map(lease_from_k8s))
    }

    async fn create_lease(&self, lease: &LeaseRecord) -> Result<LeaseRecord, StoreError> {
        let created = self
            .leases()
            .create(&PostParams::default(), &lease_to_k8s(lease))
            .await
            .map_err(create_err)?;
        Ok(lease_from_k8s(created))
    }

    async fn update_lease(&self, lease: &LeaseRecord) -> Result<LeaseRecord, StoreError> {
        let updated = self
            .leases()
            .replace(&lease.name, &PostParams::default(), &lease_to_k8s(lease))
            .await
            .map_err(update_err)?;
        Ok(lease_from_k8s(updated))
    }
}

fn claim_to_config_map(claim: &ClaimRecord) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(claim.id.clone()),
            labels: Some(claim.labels.clone()),
            annotations: Some(claim.annotations.clone()),
            resource_version: non_empty(&claim.resource_version),
            ..ObjectMeta::default()
        },
        ..ConfigMap::default()
    }
}

fn claim_from_config_map(map: ConfigMap) -> ClaimRecord {
    ClaimRecord {
        id: map.metadata.name.unwrap_or_default(),
        labels: map.metadata.labels.unwrap_or_default(),
        annotations: map.metadata.annotations.unwrap_or_default(),
        resource_version: map.metadata.resource_version.unwrap_or_default(),
    }
}

fn lease_to_k8s(record: &LeaseRecord) -> Lease {
    Lease {
        metadata: ObjectMeta {
            name: Some(record.name.clone()),
            resource_version: non_empty(&record.resource_version),
            ..ObjectMeta::default()
        },
        spec: Some(LeaseSpec {
            holder_identity: non_empty(&record.holder),
            acquire_time: Some(MicroTime(unix_to_datetime(record.acquired_at))),
            renew_time: Some(MicroTime(unix_to_datetime(record.renewed_at))),
            lease_duration_seconds: Some(record.lease_duration_secs as i32),
            lease_transitions: Some(record.transitions as i32),
            ..LeaseSpec::default()
        }),
    }
}

fn lease_from_k8s(lease: Lease) -> LeaseRecord {
    let spec = lease.spec.unwrap_or_default();
    LeaseRecord {
        name: lease.metadata.name.unwrap_or_default(),
        holder: spec.holder_identity.unwrap_or_default(),
        acquired_at: spec
            .acquire_time
            .map(|time| time.0.timestamp())
            .unwrap_or_default(),
        renewed_at: spec
            .renew_time
            .map(|time| time.0.timestamp())
            .unwrap_or_default(),
        lease_duration_secs: spec
            .lease_duration_seconds
            .map(|secs| secs.max(0) as u64)
            .unwrap_or_default(),
        transitions: spec
            .lease_transitions
            .map(|count| count.max(0) as u32)
            .unwrap_or_default(),
        resource_version: lease.metadata.resource_version.unwrap_or_default(),
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn unix_to_datetime(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn read_err(err: kube::Error) -> StoreError {
    match err {
        kube::Error::Api(response) if response.code == 404 => StoreError::NotFound,
        other => StoreError::Backend(other.to_string()),
    }
}

fn create_err(err: kube::Error) -> StoreError {
    match err {
        kube::Error::Api(response) if response.code == 409 => StoreError::AlreadyExists,
        other => StoreError::Backend(other.to_string()),
    }
}

fn update_err(err: kube::Error) -> StoreError {
    match err {
        kube::Error::Api(response) if response.code == 404 => StoreError::NotFound,
        kube::Error::Api(response) if response.code == 409 => StoreError::Conflict,
        other => StoreError::Backend(other.to_string()),
    }
}
