//! Sync engine and local stores for calsync.
//!
//! [`CalendarSync`] is the entry point: it discovers calendars, records the
//! user's selection, runs sync passes through [`SyncEngine`] and tears
//! everything down on disconnect. State lives in per-user JSON documents
//! under the configured data directory, or in memory.

pub mod config;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod events;
pub mod service;
pub mod storage;
pub mod sync_state;

#[cfg(test)]
mod testing;

pub use config::EngineConfig;
pub use credentials::{CredentialStore, StoredCredentials};
pub use engine::{CalendarFailure, SyncEngine, SyncReport, TeardownReport};
pub use error::{
    CredentialError, CredentialResult, FailureKind, StoreError, StoreResult, SyncError, SyncResult,
};
pub use events::{EventBatch, EventStore, LocalEventStore};
pub use service::{CalDavClientFactory, CalendarSync, ClientFactory};
pub use storage::StorageLocation;
pub use sync_state::SyncStateStore;
