//! Foundational low-level utilities shared across tdrive crates.
//!
//! Provides versioned JSON state files for listener persistence, unix time
//! helpers and the cooperative cancellation token threaded through the
//! ingestion pipeline.

pub mod cancellation;
pub mod state_file;
pub mod time_utils;

pub use cancellation::CancellationToken;
pub use state_file::{load_state_file, save_state_file, write_text_atomic, VersionedState};
pub use time_utils::current_unix_timestamp_ms;
