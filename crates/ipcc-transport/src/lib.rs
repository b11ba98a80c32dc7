//! Capability-set abstraction for the IPCC host protocol.
//!
//! The protocol engine never touches hardware directly. Callers hand it an
//! [`IpccOps`] implementation describing what they can do: poll for
//! readiness, read, write, sample the SP's interrupt line, and optionally
//! open/close/flush the link and sink diagnostics.
//!
//! This is the lowest layer of ipcc. A Unix serial-port implementation,
//! [`SerialPort`], is provided for hosts that reach the SP over a tty.

pub mod error;
pub mod traits;

#[cfg(unix)]
pub mod serial;

pub use error::{Result, TransportError};
pub use traits::{forward_to_tracing, IpccOps, PollEvents};

#[cfg(unix)]
pub use serial::{SerialConfig, SerialPort, DEFAULT_BAUD};
