#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! Distributed overlay for `mcall`: lease-based leader election, the task
//! distributor (leader role), and the task worker (follower role), all over
//! a compare-and-swap coordination store.

pub mod distributor;
pub mod elector;
pub mod follower;
pub mod k8s;
pub mod memory;
pub mod store;

pub use distributor::{Distributor, TaskData};
pub use elector::{Elector, ElectorConfig, lease_name_from_env};
pub use follower::TaskWorker;
pub use k8s::KubeStore;
pub use memory::MemoryStore;
pub use store::{ClaimRecord, CoordStore, LeaseRecord, StoreError};
