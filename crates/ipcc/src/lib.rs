//! Host-side IPCC: a reliable request/reply channel to the service processor.
//!
//! The SP sits at the other end of a serial link and answers a small fixed
//! catalogue of commands (identity, MAC allocation, boot storage unit,
//! key/value lookups, inventory, image blocks, and so on). This crate
//! bundles the layers that make that link usable.
//!
//! # Crate Structure
//!
//! - [`transport`]: the capability set the engine drives, plus a serial port implementation
//! - [`frame`]: checksum, COBS framing and the message codec
//! - [`host`]: command engine, SP status/alert handling, channel ownership and the
//!   operation catalogue (behind the `host` feature)

/// Re-export transport types.
pub mod transport {
    pub use ipcc_transport::*;
}

/// Re-export wire-format types.
pub mod frame {
    pub use ipcc_frame::*;
}

/// Re-export engine and catalogue types (requires `host` feature).
#[cfg(feature = "host")]
pub mod host {
    pub use ipcc_host::*;
}
