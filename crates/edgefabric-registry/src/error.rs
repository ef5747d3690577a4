//! Registry error types.

use thiserror::Error;

use edgefabric_core::{NodeId, ResourceDescriptor};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("invalid capacity {0}: compute and memory must be positive")]
    InvalidCapacity(ResourceDescriptor),

    #[error("unknown node: {0}")]
    UnknownNode(NodeId),
}

pub type RegistryResult<T> = Result<T, RegistryError>;
