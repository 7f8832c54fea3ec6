//! Error types for datagram endpoints.

use std::io;
use std::sync::Arc;

/// The outcome of an asynchronous endpoint operation.
///
/// `Ok` is a succeeded result, `Err` a failed one.
pub type AsyncResult<T> = std::result::Result<T, DatagramError>;

/// Result type alias for synchronous endpoint operations.
pub type Result<T> = std::result::Result<T, DatagramError>;

/// Errors produced by datagram endpoints.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DatagramError {
    /// A malformed address, a non-multicast group, or an out-of-range value.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Host name resolution failed.
    #[error("Unknown host: {0}")]
    UnknownHost(String),

    /// No network interface with the given name exists.
    #[error("No such network interface: {0}")]
    NoSuchInterface(String),

    /// The local address is already bound by another socket.
    #[error("Address already in use: {0}")]
    AddrInUse(String),

    /// The OS refused the operation (e.g. broadcast without `SO_BROADCAST`).
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The endpoint has been closed.
    #[error("Endpoint is closed")]
    ClosedEndpoint,

    /// The operation is not allowed in the endpoint's current phase.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Any other OS-level failure.
    #[error("I/O error: {0}")]
    Io(#[source] Arc<io::Error>),

    /// A data handler panicked while processing a packet.
    #[error("Data handler failed: {0}")]
    Handler(String),
}

/// The kind of a [`DatagramError`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`DatagramError::InvalidArgument`].
    InvalidArgument,
    /// See [`DatagramError::UnknownHost`].
    UnknownHost,
    /// See [`DatagramError::NoSuchInterface`].
    NoSuchInterface,
    /// See [`DatagramError::AddrInUse`].
    AddrInUse,
    /// See [`DatagramError::PermissionDenied`].
    PermissionDenied,
    /// See [`DatagramError::ClosedEndpoint`].
    ClosedEndpoint,
    /// See [`DatagramError::IllegalState`].
    IllegalState,
    /// See [`DatagramError::Io`].
    Io,
    /// See [`DatagramError::Handler`].
    Handler,
}

impl DatagramError {
    /// The kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::UnknownHost(_) => ErrorKind::UnknownHost,
            Self::NoSuchInterface(_) => ErrorKind::NoSuchInterface,
            Self::AddrInUse(_) => ErrorKind::AddrInUse,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::ClosedEndpoint => ErrorKind::ClosedEndpoint,
            Self::IllegalState(_) => ErrorKind::IllegalState,
            Self::Io(_) => ErrorKind::Io,
            Self::Handler(_) => ErrorKind::Handler,
        }
    }

    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub(crate) fn illegal_state(msg: impl Into<String>) -> Self {
        Self::IllegalState(msg.into())
    }
}

impl From<io::Error> for DatagramError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::AddrInUse => Self::AddrInUse(err.to_string()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(err.to_string()),
            io::ErrorKind::InvalidInput => Self::InvalidArgument(err.to_string()),
            _ => Self::Io(Arc::new(err)),
        }
    }
}
