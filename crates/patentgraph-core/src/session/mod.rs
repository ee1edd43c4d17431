//! Session lifecycle: naming, resuming and listing runs

mod manager;

pub use manager::{SessionInfo, SessionManager, SessionSummary, validate_session_id};
