//! edgefabric-health — node liveness and cluster health for the fabric.
//!
//! Nodes push `HealthReport`s; the aggregator keeps one record per node
//! and derives status from it. Silence is detected by an explicit
//! periodic sweep, never inferred from a missing call.
//!
//! # Architecture
//!
//! ```text
//! HealthMonitor
//!   ├── event loop   RegistryEvent → seed / retire node records
//!   └── sweep loop   every sweep_interval → HealthAggregator::sweep()
//!
//! HealthAggregator
//!   ├── ingest(report)        → joining/healthy/degraded/offline transitions
//!   ├── sweep()               → offline after heartbeat_timeout of silence
//!   └── cluster_summary()     → derived fresh on every call
//! ```
//!
//! # Node state machine
//!
//! ```text
//! joining ─report─▶ healthy ◀──report──▶ degraded
//!    │                 │                    │
//!    └──── timeout ────┴───── timeout ──────┴──▶ offline ─report─▶ healthy/degraded
//! ```

pub mod aggregator;
pub mod error;
pub mod monitor;

pub use aggregator::{ClusterSummary, HealthAggregator, HealthReport, NodeHealth, NodeStatus};
pub use error::{HealthError, HealthResult};
pub use monitor::HealthMonitor;
