//! Deduplicating stores for state vectors.
//!
//! A state is a vector of [`Slot`]s. Every backend hash-conses vectors into
//! compact [`StateId`]s, concurrently and without a global lock, and hands
//! them back in full or in part. The tree backends additionally share
//! structure between states that differ in a few slots.

pub mod arena;
pub mod backend;
pub mod config;
pub mod delta;
pub mod dtree;
pub mod hashcons;
pub mod id;
pub mod map;
pub mod state;
pub mod storage;
pub mod table;
pub mod tree;

/// The unit of storage.
pub type Slot = u32;

pub use backend::{build_storage, BackendKind};
pub use config::StoreConfig;
pub use delta::Delta;
pub use dtree::DTreeStore;
pub use hashcons::HashConsStore;
pub use id::{InsertedState, StateId};
pub use map::MapStore;
pub use state::{hash_slots, FullState};
pub use storage::{fatal, StateStorage, StorageStats, StoreError, StoreResult, WorkerCache};
pub use tree::TreeStore;
