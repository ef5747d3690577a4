//! edgefabric-registry — node membership and capacity bookkeeping.
//!
//! The registry is the single owner of every node's declared capacity and
//! of the reservations held against it. Nodes live in an append-only
//! arena addressed by [`NodeId`](edgefabric_core::NodeId); a node is
//! retired, never removed, so historical task assignments keep pointing
//! at a valid record.
//!
//! # Architecture
//!
//! ```text
//! NodeRegistry
//!   ├── RwLock<Inner>
//!   │   ├── arena: Vec<NodeRecord>   (declared, reserved, retired)
//!   │   └── subscribers: Vec<mpsc::UnboundedSender<RegistryEvent>>
//!   ├── reserve_best_fit()  read remaining → pick → reserve, one write lock
//!   └── release()           returns capacity, emits ResourcesReleased
//! ```
//!
//! Events are emitted while the write lock is held, so every subscriber
//! observes them in mutation order.

pub mod error;
pub mod events;
pub mod placement;
pub mod registry;

pub use error::{RegistryError, RegistryResult};
pub use events::RegistryEvent;
pub use placement::select_best_fit;
pub use registry::{NodeRecord, NodeRegistry, NodeSpec, Reservation};
