//! Storage for doctors and attentions.
//!
//! The simulation core depends only on the `AttentionStore` trait. Two
//! backends are provided: an in-memory store and, behind the `persistent`
//! feature, a WAL-backed store.

mod memory;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use memory::InMemoryStore;
pub use traits::{AttentionStore, StorageError};

#[cfg(feature = "persistent")]
pub use persistent::{open_store, PersistentConfig, PersistentStore};
