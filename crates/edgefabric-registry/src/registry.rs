//! NodeRegistry — the arena of registered nodes and their reservations.

use serde::Serialize;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

use edgefabric_core::{NodeId, ResourceDescriptor, epoch_millis};

use crate::error::{RegistryError, RegistryResult};
use crate::events::RegistryEvent;
use crate::placement::select_best_fit;

/// What a node declares when it registers.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSpec {
    pub capacity: ResourceDescriptor,
    pub location: Option<String>,
}

impl NodeSpec {
    pub fn new(compute_units: u32, memory_mb: u64) -> Self {
        Self {
            capacity: ResourceDescriptor::new(compute_units, memory_mb),
            location: None,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// A point-in-time copy of one node's bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeRecord {
    pub id: NodeId,
    /// Declared capacity.
    pub capacity: ResourceDescriptor,
    /// Sum of in-flight reservations. Never exceeds `capacity`.
    pub reserved: ResourceDescriptor,
    pub location: Option<String>,
    /// Unix epoch milliseconds.
    pub registered_at: u64,
    pub retired: bool,
}

impl NodeRecord {
    /// Declared minus reserved.
    pub fn remaining(&self) -> ResourceDescriptor {
        self.capacity.saturating_sub(self.reserved)
    }
}

/// A hold on part of a node's capacity for one task attempt.
///
/// Not `Clone`: handing the value back to [`NodeRegistry::release`]
/// consumes it, so a reservation cannot be released twice.
#[derive(Debug, PartialEq, Eq)]
pub struct Reservation {
    node_id: NodeId,
    resources: ResourceDescriptor,
}

impl Reservation {
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn resources(&self) -> ResourceDescriptor {
        self.resources
    }
}

struct Inner {
    /// Indexed by `NodeId.0`. Append-only.
    arena: Vec<NodeRecord>,
    subscribers: Vec<mpsc::UnboundedSender<RegistryEvent>>,
}

impl Inner {
    fn node(&self, id: NodeId) -> RegistryResult<&NodeRecord> {
        self.arena
            .get(id.0 as usize)
            .ok_or(RegistryError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> RegistryResult<&mut NodeRecord> {
        self.arena
            .get_mut(id.0 as usize)
            .ok_or(RegistryError::UnknownNode(id))
    }

    /// Deliver to every live subscriber, dropping closed ones.
    fn emit(&mut self, event: RegistryEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Tracks declared and reserved capacity per node.
///
/// All mutation goes through `&self` methods that take the single write
/// lock, so a capacity read always sees a consistent (declared, reserved)
/// pair and reservation decisions cannot interleave.
pub struct NodeRegistry {
    inner: RwLock<Inner>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                arena: Vec::new(),
                subscribers: Vec::new(),
            }),
        }
    }

    /// Register a node and emit `NodeJoined`.
    pub async fn register(&self, spec: NodeSpec) -> RegistryResult<NodeId> {
        if !spec.capacity.is_positive() {
            return Err(RegistryError::InvalidCapacity(spec.capacity));
        }

        let mut inner = self.inner.write().await;
        let id = NodeId(inner.arena.len() as u64);
        inner.arena.push(NodeRecord {
            id,
            capacity: spec.capacity,
            reserved: ResourceDescriptor::ZERO,
            location: spec.location.clone(),
            registered_at: epoch_millis(),
            retired: false,
        });
        inner.emit(RegistryEvent::NodeJoined {
            node_id: id,
            capacity: spec.capacity,
        });

        info!(
            node_id = %id,
            compute = spec.capacity.compute_units,
            memory_mb = spec.capacity.memory_mb,
            location = spec.location.as_deref().unwrap_or("-"),
            "node registered"
        );
        Ok(id)
    }

    /// Declared capacity of a node.
    pub async fn capacity_of(&self, id: NodeId) -> RegistryResult<ResourceDescriptor> {
        let inner = self.inner.read().await;
        Ok(inner.node(id)?.capacity)
    }

    /// Declared minus currently reserved capacity of a node.
    pub async fn remaining_of(&self, id: NodeId) -> RegistryResult<ResourceDescriptor> {
        let inner = self.inner.read().await;
        Ok(inner.node(id)?.remaining())
    }

    pub async fn get(&self, id: NodeId) -> RegistryResult<NodeRecord> {
        let inner = self.inner.read().await;
        inner.node(id).cloned()
    }

    pub async fn contains(&self, id: NodeId) -> bool {
        let inner = self.inner.read().await;
        inner.node(id).is_ok()
    }

    /// IDs of every node that has not been retired, in registration order.
    pub async fn list_active(&self) -> Vec<NodeId> {
        let inner = self.inner.read().await;
        inner
            .arena
            .iter()
            .filter(|n| !n.retired)
            .map(|n| n.id)
            .collect()
    }

    /// Whether `demand` fits the declared capacity of any active node,
    /// ignoring what is reserved right now.
    pub async fn fits_any_declared(&self, demand: ResourceDescriptor) -> bool {
        let inner = self.inner.read().await;
        inner
            .arena
            .iter()
            .any(|n| !n.retired && demand.fits_within(&n.capacity))
    }

    /// Consistent copy of every node, taken under one read lock.
    pub async fn snapshot(&self) -> Vec<NodeRecord> {
        let inner = self.inner.read().await;
        inner.arena.clone()
    }

    /// Retire a node. Its id stays allocated forever. Reservations it
    /// still holds are returned through `release` as usual.
    pub async fn retire(&self, id: NodeId) -> RegistryResult<()> {
        let mut inner = self.inner.write().await;
        let node = inner.node_mut(id)?;
        if node.retired {
            debug!(node_id = %id, "node already retired");
            return Ok(());
        }
        node.retired = true;
        inner.emit(RegistryEvent::NodeRetired { node_id: id });
        info!(node_id = %id, "node retired");
        Ok(())
    }

    /// Atomically choose the best-fit node among `candidates` and reserve
    /// `demand` on it.
    ///
    /// Returns `None` when no candidate has enough remaining capacity.
    /// Unknown ids in `candidates` are ignored.
    pub async fn reserve_best_fit(
        &self,
        candidates: &[NodeId],
        demand: ResourceDescriptor,
    ) -> Option<Reservation> {
        let mut inner = self.inner.write().await;

        let chosen = select_best_fit(
            candidates.iter().filter_map(|id| inner.node(*id).ok()),
            &demand,
        )?;

        let node = inner.node_mut(chosen).ok()?;
        node.reserved = node.reserved.checked_add(demand)?;
        debug!(
            node_id = %chosen,
            %demand,
            remaining = %node.remaining(),
            "capacity reserved"
        );

        Some(Reservation {
            node_id: chosen,
            resources: demand,
        })
    }

    /// Return a reservation's capacity to its node.
    pub async fn release(&self, reservation: Reservation) {
        let mut inner = self.inner.write().await;
        let Reservation { node_id, resources } = reservation;

        match inner.node_mut(node_id) {
            Ok(node) => {
                if !resources.fits_within(&node.reserved) {
                    warn!(
                        %node_id,
                        reserved = %node.reserved,
                        releasing = %resources,
                        "release exceeds reserved capacity"
                    );
                }
                node.reserved = node.reserved.saturating_sub(resources);
                debug!(%node_id, %resources, remaining = %node.remaining(), "capacity released");
            }
            Err(_) => {
                warn!(%node_id, "release for unknown node");
                return;
            }
        }

        inner.emit(RegistryEvent::ResourcesReleased { node_id, resources });
    }

    /// Subscribe to membership events. Only events emitted after this call
    /// are delivered.
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<RegistryEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.write().await.subscribers.push(tx);
        rx
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
