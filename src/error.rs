//! Custom error types for the acquisition pipeline.
//!
//! This module defines the primary error type, `DaqError`, for the entire
//! crate. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different kinds of failures the pipeline can
//! hit, from configuration and file I/O problems to the hardware FIFO
//! overrunning.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: wraps `figment` extraction errors (file parsing, bad TOML,
//!   malformed environment overrides).
//! - **`Configuration`**: semantic configuration errors that pass parsing but
//!   are logically invalid (unwritable save path, trigger channel out of
//!   range). These abort `start()` before any file is touched.
//! - **`Io`**: wraps `std::io::Error` from the storage writers.
//! - **`Storage`**: a write failed partway through a block record; the
//!   session carrying it is marked invalid and recording halts, since readers
//!   assume exact per-block field cardinality.
//! - **`FifoOverrun`**: the hardware FIFO reported a critical fill level on
//!   three consecutive polls. Fatal; acquisition stops and open files are
//!   closed safely.
//! - **`Acquisition`**: any other failure reported by the block source.
//! - **`SessionActive`**: an idle-only operation (such as starting again)
//!   was attempted while acquisition is running.
//!
//! With `#[from]`, `DaqError` is created seamlessly from underlying error
//! types, so `?` works throughout the crate.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Unified error type for acquisition, processing, and persistence.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Configuration file or environment extraction failed.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration parsed but is semantically invalid.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// File or directory I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A block record could not be written completely.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Hardware FIFO stayed above the critical fill level for three
    /// consecutive polls.
    #[error("Hardware FIFO overrun at {0:.1}% fill; acquisition stopped")]
    FifoOverrun(f64),

    /// Failure reported by the block source.
    #[error("Acquisition error: {0}")]
    Acquisition(String),

    /// An operation that requires the controller to be idle was attempted
    /// while acquisition is running.
    #[error("Acquisition is already active")]
    SessionActive,
}

impl DaqError {
    /// Whether acquisition must halt after this error.
    ///
    /// Fatal errors close any open session and return the controller to
    /// `Idle`; recoverable ones are reported through the sink and retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DaqError::FifoOverrun(_) | DaqError::Io(_) | DaqError::Storage(_)
        )
    }
}
