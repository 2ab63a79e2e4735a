//! Ownership and staleness rules for remote desktop/terminal/file-transfer
//! session mediation.

pub mod ownership;
pub mod staleness;

pub use ownership::{authorize_signal, can_read, Caller};
pub use staleness::{is_idle, stale_sessions};
