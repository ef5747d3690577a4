//! Membership events published by the registry.

use edgefabric_core::{NodeId, ResourceDescriptor};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A node was registered. Consumers seed per-node state from this.
    NodeJoined {
        node_id: NodeId,
        capacity: ResourceDescriptor,
    },
    /// A node was retired and will never be a placement candidate again.
    NodeRetired { node_id: NodeId },
    /// A reservation was returned to a node.
    ResourcesReleased {
        node_id: NodeId,
        resources: ResourceDescriptor,
    },
}

impl RegistryEvent {
    pub fn node_id(&self) -> NodeId {
        match self {
            RegistryEvent::NodeJoined { node_id, .. }
            | RegistryEvent::NodeRetired { node_id }
            | RegistryEvent::ResourcesReleased { node_id, .. } => *node_id,
        }
    }
}
