//! Adapters for the Seine collaborator ports.
//!
//! The engine only sees the traits in `seine_types::ports`; this crate ships
//! the in-memory implementations used by a single-instance deployment and by
//! the test suites, the broadcast event bus, and the dedup-aware document
//! persister.

pub mod events;
pub mod memory;
pub mod persister;

pub use events::BroadcastEventBus;
pub use memory::{InMemoryDocumentStore, InMemoryJobStore, StaticSourceRegistry};
pub use persister::DocumentPersister;
