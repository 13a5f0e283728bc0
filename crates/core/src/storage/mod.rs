//! Storage engine abstraction.
//!
//! An engine hands out named database handles; a handle owns its tables, a
//! transaction primitive and the synchronization sub-object. `MemoryEngine`
//! is the in-process implementation; the `storage-sqlite` crate provides a
//! persistent one.

mod memory;
mod storage_traits;

pub use memory::{EngineOp, FailurePoint, MemoryEngine, MemoryHandle};
pub use storage_traits::*;
