//! Durable session storage
//!
//! Result collections and the progress ledger of a session, each kept in
//! its own JSON file and replaced atomically on every write.

mod progress;
mod store;

pub use progress::{KeySet, ProgressLedger};
pub use store::{DurableStore, PROGRESS_FILE_SUFFIX, StoreKind, write_json_atomic};
