//! Decoded results of the operation catalogue.

use std::fmt;

use bytes::Buf;
use serde::Serialize;

use crate::error::{HostError, Result};

/// Size of the NUL-padded model and serial fields of an identity reply.
pub const IDENT_FIELD_LEN: usize = 51;
/// Fixed size of an identity reply.
pub const IDENT_LEN: usize = IDENT_FIELD_LEN + 4 + IDENT_FIELD_LEN;
/// Fixed size of a MAC block reply.
pub const MAC_BLOCK_LEN: usize = 9;
/// Fixed size of a status reply.
pub const STATUS_LEN: usize = 16;
/// Size of the NUL-padded device name in an inventory reply.
pub const INVENTORY_NAME_LEN: usize = 32;
/// Size of the image hash sent with an image-block request.
pub const IMAGE_HASH_LEN: usize = 32;

fn padded_str(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

fn malformed(command: &'static str, reason: &'static str) -> HostError {
    HostError::MalformedReply { command, reason }
}

/// The platform's identity as burned in at manufacture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ident {
    pub model: String,
    pub revision: u32,
    pub serial: String,
}

impl Ident {
    pub fn decode(mut payload: &[u8]) -> Result<Self> {
        if payload.len() != IDENT_LEN {
            return Err(malformed("IDENT", "wrong size"));
        }
        let model = padded_str(&payload[..IDENT_FIELD_LEN]);
        payload.advance(IDENT_FIELD_LEN);
        let revision = payload.get_u32_le();
        let serial = padded_str(payload);
        Ok(Self {
            model,
            revision,
            serial,
        })
    }
}

/// A block of MAC addresses allocated to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MacBlock {
    pub base: [u8; 6],
    pub count: u16,
    pub stride: u8,
}

impl MacBlock {
    pub fn decode(mut payload: &[u8]) -> Result<Self> {
        if payload.len() != MAC_BLOCK_LEN {
            return Err(malformed("MACS", "wrong size"));
        }
        let mut base = [0u8; 6];
        payload.copy_to_slice(&mut base);
        Ok(Self {
            base,
            count: payload.get_u16_le(),
            stride: payload.get_u8(),
        })
    }

    /// Every address in the block. The stride steps the low 24 bits and
    /// leaves the OUI alone.
    pub fn addresses(&self) -> impl Iterator<Item = MacAddr> + '_ {
        let oui = [self.base[0], self.base[1], self.base[2]];
        let low = u32::from_be_bytes([0, self.base[3], self.base[4], self.base[5]]);
        (0..u32::from(self.count)).map(move |i| {
            let nic = low.wrapping_add(i * u32::from(self.stride)).to_be_bytes();
            MacAddr([oui[0], oui[1], oui[2], nic[1], nic[2], nic[3]])
        })
    }
}

/// A single MAC address, displayed colon-separated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacAddr(pub [u8; 6]);

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl Serialize for MacAddr {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// The SP's status register and startup options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SpStatus {
    pub status: u64,
    pub startup: u64,
}

impl SpStatus {
    pub fn decode(mut payload: &[u8]) -> Result<Self> {
        if payload.len() != STATUS_LEN {
            return Err(malformed("STATUS", "wrong size"));
        }
        Ok(Self {
            status: payload.get_u64_le(),
            startup: payload.get_u64_le(),
        })
    }
}

/// Result code of a key lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyLookupResult {
    Success,
    UnknownKey,
    NoValue,
    BufferTooSmall,
    Other(u8),
}

impl From<u8> for KeyLookupResult {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::Success,
            1 => Self::UnknownKey,
            2 => Self::NoValue,
            3 => Self::BufferTooSmall,
            other => Self::Other(other),
        }
    }
}

impl From<KeyLookupResult> for u8 {
    fn from(result: KeyLookupResult) -> Self {
        match result {
            KeyLookupResult::Success => 0,
            KeyLookupResult::UnknownKey => 1,
            KeyLookupResult::NoValue => 2,
            KeyLookupResult::BufferTooSmall => 3,
            KeyLookupResult::Other(code) => code,
        }
    }
}

/// Outcome of a key lookup. The value itself is in the caller's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KeyLookup {
    pub result: KeyLookupResult,
    pub len: usize,
}

/// Result code of a key set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySetResult {
    Success,
    UnknownKey,
    ReadOnly,
    TooLong,
    Other(u8),
}

impl From<u8> for KeySetResult {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::Success,
            1 => Self::UnknownKey,
            2 => Self::ReadOnly,
            3 => Self::TooLong,
            other => Self::Other(other),
        }
    }
}

impl From<KeySetResult> for u8 {
    fn from(result: KeySetResult) -> Self {
        match result {
            KeySetResult::Success => 0,
            KeySetResult::UnknownKey => 1,
            KeySetResult::ReadOnly => 2,
            KeySetResult::TooLong => 3,
            KeySetResult::Other(code) => code,
        }
    }
}

/// Result code of an inventory query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InventoryResult {
    Success,
    InvalidIndex,
    DeviceAbsent,
    IoError,
    Timeout,
    Other(u8),
}

impl From<u8> for InventoryResult {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::Success,
            1 => Self::InvalidIndex,
            2 => Self::DeviceAbsent,
            3 => Self::IoError,
            4 => Self::Timeout,
            other => Self::Other(other),
        }
    }
}

impl From<InventoryResult> for u8 {
    fn from(result: InventoryResult) -> Self {
        match result {
            InventoryResult::Success => 0,
            InventoryResult::InvalidIndex => 1,
            InventoryResult::DeviceAbsent => 2,
            InventoryResult::IoError => 3,
            InventoryResult::Timeout => 4,
            InventoryResult::Other(code) => code,
        }
    }
}

/// One entry of the SP's hardware inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Inventory {
    pub index: u32,
    pub result: InventoryResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<u8>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<u8>,
}

impl Inventory {
    pub fn decode(index: u32, mut payload: &[u8]) -> Result<Self> {
        if !payload.has_remaining() {
            return Err(malformed("INVENTORY", "missing result code"));
        }
        let result = InventoryResult::from(payload.get_u8());
        let mut entry = Self {
            index,
            result,
            name: None,
            kind: None,
            data: Vec::new(),
        };
        if result == InventoryResult::InvalidIndex {
            return Ok(entry);
        }

        if payload.remaining() < INVENTORY_NAME_LEN {
            return Err(malformed("INVENTORY", "truncated device name"));
        }
        entry.name = Some(padded_str(&payload[..INVENTORY_NAME_LEN]));
        payload.advance(INVENTORY_NAME_LEN);
        if result != InventoryResult::Success {
            return Ok(entry);
        }

        if !payload.has_remaining() {
            return Err(malformed("INVENTORY", "missing device type"));
        }
        entry.kind = Some(payload.get_u8());
        entry.data = payload.to_vec();
        Ok(entry)
    }
}
