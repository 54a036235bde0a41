//! Bulk load and write-back between the registry and the device store.

mod manager;

pub use manager::{PersistOutcome, PersistenceSync};
