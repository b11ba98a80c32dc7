//! Host side of the IPCC link to the service processor.
//!
//! This is the layer that makes a lossy serial link behave like a function
//! call. [`IpccClient`] runs catalogue operations, [`Session`] runs raw
//! transactions, and [`Channel`] keeps concurrent callers from interleaving
//! on the wire. Unsolicited SP events (restarts and alerts) are serviced
//! transparently whenever the SP raises its interrupt line.

pub mod channel;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
mod io;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
mod status;
pub mod types;

pub use channel::{CancelToken, Channel, ChannelGuard, Mode, Resources};
pub use client::IpccClient;
pub use config::EngineConfig;
pub use engine::{check_reply, next_sequence, Rejection, Session};
pub use error::{HostError, Result};
pub use types::{
    Ident, Inventory, InventoryResult, KeyLookup, KeyLookupResult, KeySetResult, MacAddr,
    MacBlock, SpStatus,
};
