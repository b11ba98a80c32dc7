use std::path::PathBuf;

/// Errors reported by a capability-set implementation.
///
/// These are passed through the protocol engine verbatim; the engine never
/// retries them.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to open the serial device.
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to configure the serial device (termios).
    #[error("failed to configure {path}: {source}")]
    Configure {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to sample the out-of-band interrupt line.
    #[error("failed to read interrupt line {path}: {source}")]
    InterruptLine {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The requested baud rate has no termios equivalent.
    #[error("unsupported baud rate {0}")]
    UnsupportedBaud(u32),

    /// The transport has no buffer space for the operation.
    #[error("transport has no buffer space")]
    NoBufferSpace,

    /// An I/O error occurred on the transport.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport has been closed.
    #[error("transport closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;
