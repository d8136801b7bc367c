//! Error types for stripeio
//!
//! This module defines the common error type used throughout the system.

use thiserror::Error;

/// Common result type for stripeio operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid RAID level, insufficient drivers, bad configuration file
    Config,
    /// Driver or filesystem I/O failure
    Io,
    /// Unknown file id or missing block
    NotFound,
    /// Metadata fails invariants, or reconstruction is impossible
    Corrupt,
    /// The surrounding context was cancelled or its deadline expired
    Cancelled,
    /// Invariant violation inside stripeio itself
    Internal,
}

/// Common error type for stripeio
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("driver {driver} failed: {message}")]
    DriverIo { driver: String, message: String },

    #[error("stripe {stripe_index} write failed: {failed} of {total} blocks lost")]
    StripeWrite {
        stripe_index: usize,
        failed: usize,
        total: usize,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("corrupt metadata: {0}")]
    CorruptMetadata(String),

    #[error("stripe {stripe_index} unrecoverable: {missing} of {total} blocks missing")]
    Unrecoverable {
        stripe_index: usize,
        missing: usize,
        total: usize,
    },

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a driver I/O error
    pub fn driver_io(driver: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DriverIo {
            driver: driver.into(),
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a corrupt metadata error
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::CorruptMetadata(msg.into())
    }

    /// Create a cancellation error
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Classify this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::Io(_) | Self::DriverIo { .. } | Self::StripeWrite { .. } => ErrorKind::Io,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::CorruptMetadata(_) | Self::Unrecoverable { .. } => ErrorKind::Corrupt,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Check if this is a corruption error
    #[must_use]
    pub fn is_corrupt(&self) -> bool {
        self.kind() == ErrorKind::Corrupt
    }

    /// Check if this is an I/O error
    #[must_use]
    pub fn is_io(&self) -> bool {
        self.kind() == ErrorKind::Io
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::config("bad").kind(), ErrorKind::Config);
        assert_eq!(Error::driver_io("d1", "boom").kind(), ErrorKind::Io);
        assert_eq!(Error::not_found("file_x").kind(), ErrorKind::NotFound);
        assert_eq!(Error::corrupt("bad record").kind(), ErrorKind::Corrupt);
        assert_eq!(Error::cancelled("deadline").kind(), ErrorKind::Cancelled);
        assert_eq!(Error::internal("bug").kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_predicates() {
        assert!(Error::not_found("x").is_not_found());
        assert!(!Error::not_found("x").is_corrupt());
        assert!(Error::Unrecoverable {
            stripe_index: 0,
            missing: 2,
            total: 3
        }
        .is_corrupt());
        assert!(Error::StripeWrite {
            stripe_index: 1,
            failed: 2,
            total: 5
        }
        .is_io());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        let err: Error = io.into();
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
