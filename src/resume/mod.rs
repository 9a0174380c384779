//! Resumable harvest state
//!
//! Checkpoints and record spools with atomic writes and file locking.

pub mod checkpoint;
pub mod lock;
pub mod store;

pub use checkpoint::{checkpoint_key, Checkpoint, PageGap, SCHEMA_VERSION};
pub use lock::InstanceLock;
pub use store::{CheckpointError, CheckpointStore};
