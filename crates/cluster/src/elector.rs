use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;

use crate::store::{CoordStore, LeaseRecord, StoreError};

/// Leader-election parameters. The defaults mirror the deployment's
/// coordination settings: 15 s lease, 10 s renewal deadline, 2 s retries.
#[derive(Debug, Clone)]
pub struct ElectorConfig {
    pub lease_name: String,
    /// This replica's identity (its hostname).
    pub identity: String,
    pub lease_duration: Duration,
    pub renew_deadline: Duration,
    pub retry_period: Duration,
}

impl ElectorConfig {
    pub fn new(lease_name: String, identity: String) -> Self {
        Self {
            lease_name,
            identity,
            lease_duration: Duration::from_secs(15),
            renew_deadline: Duration::from_secs(10),
            retry_period: Duration::from_secs(2),
        }
    }
}

/// Lease name for this deployment: `mcall-leader-<suffix>` with the suffix
/// from `GIT_BRANCH`. The historical `GIT-BRANCH` spelling is accepted as a
/// fallback; without either the name is plain `mcall-leader`.
pub fn lease_name_from_env() -> String {
    let suffix = std::env::var("GIT_BRANCH")
        .or_else(|_| std::env::var("GIT-BRANCH"))
        .unwrap_or_default();
    if suffix.is_empty() {
        "mcall-leader".to_string()
    } else {
        format!("mcall-leader-{suffix}")
    }
}

/// Competes for the named lease and publishes leadership transitions on a
/// watch channel. At most one identity holds the lease per epoch; losing it
/// simply resumes candidacy.
pub struct Elector {
    store: Arc<dyn CoordStore>,
    cfg: ElectorConfig,
    leader_tx: watch::Sender<bool>,
    leader_rx: watch::Receiver<bool>,
}

impl Elector {
    pub fn new(store: Arc<dyn CoordStore>, cfg: ElectorConfig) -> Self {
        let (leader_tx, leader_rx) = watch::channel(false);
        Self {
            store,
            cfg,
            leader_tx,
            leader_rx,
        }
    }

    /// The leadership signal: `true` while this replica holds the lease.
    pub fn leadership(&self) -> watch::Receiver<bool> {
        self.leader_rx.clone()
    }

    /// Runs candidacy until shutdown. On exit the lease is released when
    /// this replica still holds it.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.cfg.retry_period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last_renewed: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }

            let leading = self.try_acquire_or_renew(&mut last_renewed).await;
            self.set_leading(leading);
        }

        if *self.leader_rx.borrow() {
            self.release().await;
        }
        self.set_leading(false);
    }

    fn set_leading(&self, leading: bool) {
        self.leader_tx.send_if_modified(|current| {
            if *current != leading {
                if leading {
                    tracing::info!(lease = %self.cfg.lease_name, "became leader");
                } else {
                    tracing::info!(lease = %self.cfg.lease_name, "lost leadership");
                }
                *current = leading;
                true
            } else {
                false
            }
        });
    }

    pub(crate) async fn try_acquire_or_renew(&self, last_renewed: &mut Option<Instant>) -> bool {
        let now = Utc::now().timestamp();
        let me = self.cfg.identity.as_str();

        match self.store.get_lease(&self.cfg.lease_name).await {
            Ok(None) => {
                let lease = LeaseRecord {
                    name: self.cfg.lease_name.clone(),
                    holder: me.to_string(),
                    acquired_at: now,
                    renewed_at: now,
                    lease_duration_secs: self.cfg.lease_duration.as_secs(),
                    transitions: 1,
                    resource_version: String::new(),
                };
                match self.store.create_lease(&lease).await {
                    Ok(_) => {
                        *last_renewed = Some(Instant::now());
                        true
                    }
                    Err(StoreError::AlreadyExists) => false,
                    Err(err) => {
                        tracing::warn!(error = %err, "lease create failed");
                        false
                    }
                }
            }
            Ok(Some(current)) if current.holder == me => {
                let mut lease = current;
                lease.renewed_at = now;
                match self.store.update_lease(&lease).await {
                    Ok(_) => {
                        *last_renewed = Some(Instant::now());
                        true
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "lease renewal failed");
                        self.still_within_deadline(*last_renewed)
                    }
                }
            }
            Ok(Some(current)) => {
                if !current.holder.is_empty() && !current.expired(now) {
                    return false;
                }
                // Expired or released: take over under CAS.
                let mut lease = current;
                lease.holder = me.to_string();
                lease.acquired_at = now;
                lease.renewed_at = now;
                lease.lease_duration_secs = self.cfg.lease_duration.as_secs();
                lease.transitions += 1;
                match self.store.update_lease(&lease).await {
                    Ok(_) => {
                        *last_renewed = Some(Instant::now());
                        true
                    }
                    Err(StoreError::Conflict) => false,
                    Err(err) => {
                        tracing::warn!(error = %err, "lease takeover failed");
                        false
                    }
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "lease read failed");
                self.still_within_deadline(*last_renewed)
            }
        }
    }

    // Store hiccups do not immediately demote a healthy leader; leadership
    // lapses once the renewal deadline passes without a successful renewal.
    fn still_within_deadline(&self, last_renewed: Option<Instant>) -> bool {
        last_renewed
            .map(|at| at.elapsed() < self.cfg.renew_deadline)
            .unwrap_or(false)
    }

    async fn release(&self) {
        let current = match self.store.get_lease(&self.cfg.lease_name).await {
            Ok(Some(lease)) if lease.holder == self.cfg.identity => lease,
            _ => return,
        };
        let mut lease = current;
        lease.holder = String::new();
        if let Err(err) = self.store.update_lease(&lease).await {
            tracing::debug!(error = %err, "lease release failed");
        }
    }
}
