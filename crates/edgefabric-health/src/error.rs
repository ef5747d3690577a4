//! Health ingestion errors.

use thiserror::Error;

use edgefabric_core::NodeId;

#[derive(Debug, Error, PartialEq)]
pub enum HealthError {
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("invalid load {load} from {node_id}: must be within 0..=1")]
    InvalidLoad { node_id: NodeId, load: f64 },

    #[error("invalid resource usage from {0}: cpu and memory must be finite and non-negative")]
    InvalidUsage(NodeId),
}

pub type HealthResult<T> = Result<T, HealthError>;
