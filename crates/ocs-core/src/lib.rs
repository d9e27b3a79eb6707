//! Foundational low-level utilities shared across ocs crates.
//!
//! Provides atomic report writes, `.env` parsing, and the timestamp helpers
//! embedded in generated reports.

pub mod atomic_io;
pub mod env_file;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use env_file::{load_env_file, parse_env_source, EnvFile};
pub use time_utils::{current_rfc3339_timestamp, current_unix_timestamp};
