#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # strom-store
//!
//! The shared state store: the single source of truth that lets
//! multiple engine replicas coordinate one execution.
//!
//! [`StateStore`] is the capability set the scheduler relies on —
//! single-key compare-and-set, atomic pending-counter decrement,
//! hash-field node patches, blob-spilling output writes, and the scoped
//! run-set/queue primitives behind the concurrency manager. The store
//! must be consistent for single-key operations across replicas; it is
//! not required to be transactional across keys.
//!
//! [`MemoryStore`] is the reference backend: every per-execution record
//! sits behind its own mutex shard, which gives exactly the single-key
//! atomicity the contract asks for.

pub mod error;
pub mod memory;
pub mod retry;
pub mod store;

pub use error::StoreError;
pub use memory::{MemoryStore, StoreConfig};
pub use retry::{StoreRetryPolicy, with_store_retry};
pub use store::{
    CancelInfo, CasOutcome, InitOutcome, NodePatch, QueuePush, SlotAcquire, StateStore,
};

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
