//! edgefabric-scheduler — task ordering and dispatch.
//!
//! Accepts tasks, orders them largest-first, and places each on the
//! healthy node with the most slack. The scheduler:
//!
//! - Validates submissions and keeps a status record per task
//! - Orders pending work by (compute desc, memory desc, submission order)
//! - Reserves capacity atomically before handing a task to a node
//! - Releases the reservation on every outcome, and re-enqueues failed
//!   attempts up to `max_retries`
//! - Cancels queued tasks outright and dispatched tasks best-effort
//!
//! # Architecture
//!
//! ```text
//! EdgeRuntime
//!   ├── TaskQueue (ordered pending work + readiness signal)
//!   ├── HealthAggregator (which nodes are healthy)
//!   ├── NodeRegistry (best-fit reservation)
//!   ├── Executor (hands a task to a node, resolves with its result)
//!   └── StateStore (optional, terminal outcomes)
//! ```

pub mod error;
pub mod executor;
pub mod queue;
pub mod runtime;

pub use error::{SchedulerError, SchedulerResult};
pub use executor::{ExecutionError, ExecutionFuture, Executor, LoopbackExecutor};
pub use queue::{QueuedTask, TaskQueue};
pub use runtime::{CancelOutcome, DispatchResult, EdgeRuntime, TaskStatus};
