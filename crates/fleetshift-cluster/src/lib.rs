//! fleetshift-cluster — the cluster API as seen by the rollout engine.
//!
//! - **`facade`** — `Cluster` / `ObjectApi` traits, change events, subscriptions
//! - **`memory`** — `MemoryCluster`, an in-process implementation with fault injection
//! - **`sim`** — `ClusterSim`, replication/placement/kubelet behaviour on top of it
//!
//! # Architecture
//!
//! ```text
//! rollout engine ──► &dyn Cluster
//!                       ├── workloads() ─┐
//!                       ├── pods()      ─┼─► MemoryCluster stores ◄── ClusterSim (tick loop)
//!                       └── nodes()     ─┘
//! ```

pub mod error;
pub mod facade;
pub mod memory;
pub mod sim;

pub use error::{ClusterError, ClusterResult};
pub use facade::{ChangeEvent, Cluster, ClusterFuture, ObjectApi, Subscription};
pub use memory::{Faults, MemoryCluster, Store};
pub use sim::{ClusterSim, SimReport, SimSettings};
