//! Shared types used across edge fabric crates.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Opaque handle for a registered node.
///
/// Assigned by the registry from a monotonic counter, so a handle is
/// never handed out twice, even after the node is retired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// Client-supplied task identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ── Resources ──────────────────────────────────────────────────────

/// A quantity of compute and memory: a node's declared capacity, a
/// task's demand, or a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub compute_units: u32,
    pub memory_mb: u64,
}

impl ResourceDescriptor {
    pub const ZERO: Self = Self {
        compute_units: 0,
        memory_mb: 0,
    };

    pub const fn new(compute_units: u32, memory_mb: u64) -> Self {
        Self {
            compute_units,
            memory_mb,
        }
    }

    /// Both dimensions are strictly positive.
    pub fn is_positive(&self) -> bool {
        self.compute_units > 0 && self.memory_mb > 0
    }

    /// `self` fits inside `available` in every dimension.
    pub fn fits_within(&self, available: &ResourceDescriptor) -> bool {
        self.compute_units <= available.compute_units && self.memory_mb <= available.memory_mb
    }

    pub fn saturating_sub(self, other: ResourceDescriptor) -> Self {
        Self {
            compute_units: self.compute_units.saturating_sub(other.compute_units),
            memory_mb: self.memory_mb.saturating_sub(other.memory_mb),
        }
    }

    pub fn checked_add(self, other: ResourceDescriptor) -> Option<Self> {
        Some(Self {
            compute_units: self.compute_units.checked_add(other.compute_units)?,
            memory_mb: self.memory_mb.checked_add(other.memory_mb)?,
        })
    }
}

impl fmt::Display for ResourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}cu/{}MB", self.compute_units, self.memory_mb)
    }
}

// ── Tasks ──────────────────────────────────────────────────────────

/// Supported task payload kinds.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    #[default]
    Empty,
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
}

/// What a client sends to submit a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSubmission {
    pub id: TaskId,
    pub compute_units: u32,
    pub memory_mb: u64,
    #[serde(default)]
    pub payload: Payload,
}

impl TaskSubmission {
    pub fn new(id: impl Into<TaskId>, compute_units: u32, memory_mb: u64) -> Self {
        Self {
            id: id.into(),
            compute_units,
            memory_mb,
            payload: Payload::Empty,
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    pub fn requirement(&self) -> ResourceDescriptor {
        ResourceDescriptor::new(self.compute_units, self.memory_mb)
    }
}

/// An accepted unit of work. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub requirement: ResourceDescriptor,
    pub payload: Payload,
    /// Unix epoch milliseconds at acceptance.
    pub submitted_at: u64,
}

impl Task {
    pub fn new(id: TaskId, requirement: ResourceDescriptor, payload: Payload) -> Self {
        Self {
            id,
            requirement,
            payload,
            submitted_at: epoch_millis(),
        }
    }
}

impl From<TaskSubmission> for Task {
    fn from(sub: TaskSubmission) -> Self {
        let requirement = sub.requirement();
        Task::new(sub.id, requirement, sub.payload)
    }
}

/// Current Unix epoch in milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
