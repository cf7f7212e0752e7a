//! Error types for the hardware layer.

use std::fmt;

use thiserror::Error;

use crate::buffer::BufferHeader;
use crate::{ComponentId, ConnectionId, PortRef};

/// Status codes reported by the multimedia stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Out of memory.
    NoMemory,
    /// Out of resources.
    NoSpace,
    /// Invalid argument.
    Invalid,
    /// Function not implemented or parameter not supported.
    NotSupported,
    /// No such entry.
    NotFound,
    /// No such device.
    NoDevice,
    /// I/O error.
    Io,
    /// Component is not ready.
    NotReady,
    /// Incorrect configuration.
    BadConfig,
    /// Port is already connected.
    IsConnected,
    /// Port is not connected.
    NotConnected,
    /// Resource temporarily unavailable.
    Again,
}

impl Status {
    /// Returns the conventional short name of the status.
    pub fn name(self) -> &'static str {
        match self {
            Self::NoMemory => "ENOMEM",
            Self::NoSpace => "ENOSPC",
            Self::Invalid => "EINVAL",
            Self::NotSupported => "ENOSYS",
            Self::NotFound => "ENOENT",
            Self::NoDevice => "ENXIO",
            Self::Io => "EIO",
            Self::NotReady => "ENOTREADY",
            Self::BadConfig => "ECONFIG",
            Self::IsConnected => "EISCONN",
            Self::NotConnected => "ENOTCONN",
            Self::Again => "EAGAIN",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors raised by the hardware layer.
#[derive(Debug, Error)]
pub enum HalError {
    /// A hardware call returned a failure status.
    #[error("{op} failed: {status}")]
    Status { op: &'static str, status: Status },

    /// The host has not been brought up.
    #[error("Host not brought up")]
    HostNotReady,

    /// No component with this id.
    #[error("Unknown component {0:?}")]
    UnknownComponent(ComponentId),

    /// No port with this reference.
    #[error("Unknown port {0}")]
    UnknownPort(PortRef),

    /// No connection with this id.
    #[error("Unknown connection {0:?}")]
    UnknownConnection(ConnectionId),

    /// The component still has live connections.
    #[error("Component {0:?} still has live connections")]
    StillConnected(ComponentId),

    /// A pool already exists for this port.
    #[error("Port {0} already owns a buffer pool")]
    PoolExists(PortRef),

    /// No pool exists for this port.
    #[error("Port {0} has no buffer pool")]
    NoPool(PortRef),

    /// The pool had no buffer to hand out.
    #[error("Buffer pool for port {0} is empty")]
    PoolExhausted(PortRef),

    /// A buffer was returned that the pool did not hand out.
    #[error("Buffer {index} does not belong to this pool or was already released")]
    ForeignBuffer { index: usize },
}

impl HalError {
    /// Shorthand for a failed hardware call.
    pub fn status(op: &'static str, status: Status) -> Self {
        Self::Status { op, status }
    }

    /// Returns the underlying status, if any.
    pub fn status_code(&self) -> Option<Status> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true if the hardware reported the call as unsupported.
    pub fn is_not_supported(&self) -> bool {
        self.status_code() == Some(Status::NotSupported)
    }
}

/// A buffer the port refused, handed back to the caller.
#[derive(Debug)]
pub struct Rejected {
    pub buffer: BufferHeader,
    pub error: HalError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        let err = HalError::status("enable port", Status::NotSupported);
        assert_eq!(err.to_string(), "enable port failed: ENOSYS");
        assert!(err.is_not_supported());
        assert!(!HalError::HostNotReady.is_not_supported());
    }
}
