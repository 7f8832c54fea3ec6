//! Error types for the quay runtime.

use std::fmt;

/// Errors reported by an event-loop [`Context`](crate::Context).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    /// The event loop owning the context has exited; nothing more will run on it.
    Stopped,
    /// A blocking call was made from the context it would wait on.
    WouldDeadlock,
}

impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "The event loop owning this context has stopped"),
            Self::WouldDeadlock => {
                write!(f, "Blocking on a context from its own thread would deadlock")
            }
        }
    }
}

impl std::error::Error for ContextError {}

/// Errors that can occur with the async runtime.
#[derive(Debug, Clone)]
pub enum AsyncRuntimeError {
    /// The runtime has already been initialized.
    AlreadyInitialized,
    /// Failed to create the runtime.
    CreationFailed(String),
}

impl fmt::Display for AsyncRuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInitialized => write!(f, "Async runtime already initialized"),
            Self::CreationFailed(msg) => write!(f, "Failed to create async runtime: {msg}"),
        }
    }
}

impl std::error::Error for AsyncRuntimeError {}

/// A specialized Result type for runtime operations.
pub type Result<T> = std::result::Result<T, ContextError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_error_display() {
        assert_eq!(
            ContextError::Stopped.to_string(),
            "The event loop owning this context has stopped"
        );
        assert!(ContextError::WouldDeadlock.to_string().contains("deadlock"));
    }

    #[test]
    fn test_runtime_error_display() {
        let err = AsyncRuntimeError::CreationFailed("no reactor".into());
        assert_eq!(err.to_string(), "Failed to create async runtime: no reactor");
    }
}
