//! Error type shared by every ctlkit crate.
//!
//! `CtlError` separates failures into the classes a caller has to treat
//! differently:
//!
//! - **`Configuration`**: declaration or wiring misuse (unsupported dtype, duplicate
//!   sub-controller path, a `put_` method bound to a read-only attribute, a name used by
//!   both an attribute and a method). Always fatal and raised before the misuse can take
//!   effect. Never retried.
//! - **`Value`**: a value could not be coerced to an attribute's dtype. The attribute is left
//!   unmodified and the caller may retry with a valid value.
//! - **`Disconnected`**: I/O was attempted on a transport that is not connected, has been
//!   closed, or whose owning controller has been dropped. The caller must reconnect first.
//! - **`Io`** and **`Device`**: the transport or the device itself failed.

use thiserror::Error;

/// Convenience alias for results using [`CtlError`].
pub type CtlResult<T> = std::result::Result<T, CtlError>;

/// Primary error type for the controller runtime.
#[derive(Error, Debug)]
pub enum CtlError {
    /// Declaration or wiring misuse.
    ///
    /// Occurs while declaring attributes and methods, registering sub-controllers,
    /// building a mapping, or linking put methods to attributes.
    ///
    /// **Recovery Strategy**: None at runtime. Fix the controller declaration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A value could not be coerced to the target dtype.
    ///
    /// **Recovery Strategy**: Retry with a valid value. State is unchanged.
    #[error("Value error: {0}")]
    Value(String),

    /// The transport (or the controller owning an attribute) is gone.
    ///
    /// Raised synchronously instead of waiting on a connection that will never answer.
    ///
    /// **Recovery Strategy**: Call `connect()` again before retrying.
    #[error("Disconnected: {0}")]
    Disconnected(String),

    /// Transport I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The device reported an error or answered with something unusable.
    #[error("Device error: {0}")]
    Device(String),
}

impl CtlError {
    /// True for declaration/wiring misuse.
    pub fn is_configuration(&self) -> bool {
        matches!(self, CtlError::Configuration(_))
    }

    /// True for coercion failures.
    pub fn is_value(&self) -> bool {
        matches!(self, CtlError::Value(_))
    }

    /// True when the transport must be reconnected.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, CtlError::Disconnected(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(CtlError::Configuration("x".into()).is_configuration());
        assert!(CtlError::Value("x".into()).is_value());
        assert!(CtlError::Disconnected("x".into()).is_disconnected());
        assert!(!CtlError::Device("x".into()).is_disconnected());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: CtlError = io.into();
        assert!(matches!(err, CtlError::Io(_)));
        assert_eq!(err.to_string(), "I/O error: pipe");
    }
}
