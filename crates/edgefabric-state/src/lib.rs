//! edgefabric-state — the authority's embedded store.
//!
//! Backed by [redb](https://docs.rs/redb), holds the authority copy of
//! every synchronized record and the terminal outcome of every task.
//!
//! # Architecture
//!
//! All values are JSON-serialized into redb's `&[u8]` value columns.
//! Records are stored opaquely so the store does not depend on the
//! sync crate's record type; callers pick the type at the call site.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
