use bytes::{Buf, BufMut};

use crate::checksum::checksum;
use crate::cobs::max_encoded_len;
use crate::error::{FrameError, Result};

/// Protocol magic carried in every header.
pub const MAGIC: u32 = 0x01DE_19CC;

/// Protocol version carried in every header.
pub const VERSION: u32 = 1;

/// Set by the SP in the sequence field of every reply.
pub const SEQ_REPLY: u64 = 1 << 63;

/// Sequence bits that carry the request number.
pub const SEQ_MASK: u64 = !SEQ_REPLY;

/// Sequence sentinel used by the SP when it could not decode a request.
pub const SEQ_UNKNOWN: u64 = u64::MAX;

/// Header: magic (4) + version (4) + sequence (8) + command (1) = 17 bytes.
pub const HEADER_SIZE: usize = 17;

/// Trailing Fletcher-16 checksum.
pub const CHECKSUM_SIZE: usize = 2;

/// Smallest valid message: a header and checksum with no payload.
pub const MIN_MESSAGE_SIZE: usize = HEADER_SIZE + CHECKSUM_SIZE;

/// Largest unframed message either side will produce.
pub const MAX_MESSAGE_SIZE: usize = 4123;

/// Largest payload that fits in one message.
pub const MAX_DATA_SIZE: usize = MAX_MESSAGE_SIZE - MIN_MESSAGE_SIZE;

/// Largest framed packet, including its terminator.
pub const MAX_PACKET_SIZE: usize = max_encoded_len(MAX_MESSAGE_SIZE) + 1;

/// Fixed-layout message header.
///
/// Wire format (little-endian):
/// ```text
/// ┌────────────┬──────────────┬───────────────┬─────────┬──────────┬──────────┐
/// │ Magic (4B) │ Version (4B) │ Sequence (8B) │ Cmd (1B)│ Payload  │ Fletcher │
/// │            │              │               │         │ (0..N)   │ 16 (2B)  │
/// └────────────┴──────────────┴───────────────┴─────────┴──────────┴──────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u32,
    pub version: u32,
    pub sequence: u64,
    pub command: u8,
}

impl Header {
    /// A header carrying this host's magic and version.
    pub fn new(sequence: u64, command: u8) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            sequence,
            command,
        }
    }

    /// Write the header at the start of `buf`, returning [`HEADER_SIZE`].
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < HEADER_SIZE {
            return Err(FrameError::BufferExhausted {
                capacity: buf.len(),
            });
        }
        let mut dst = &mut buf[..HEADER_SIZE];
        dst.put_u32_le(self.magic);
        dst.put_u32_le(self.version);
        dst.put_u64_le(self.sequence);
        dst.put_u8(self.command);
        Ok(HEADER_SIZE)
    }

    /// Read a header from the start of `buf`. Field values are not checked.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(FrameError::MessageTooShort {
                len: buf.len(),
                min: HEADER_SIZE,
            });
        }
        let mut src = &buf[..HEADER_SIZE];
        Ok(Self {
            magic: src.get_u32_le(),
            version: src.get_u32_le(),
            sequence: src.get_u64_le(),
            command: src.get_u8(),
        })
    }
}

/// Write a host header for `sequence`/`command` at the start of `buf`.
pub fn encode_header(buf: &mut [u8], sequence: u64, command: u8) -> Result<usize> {
    Header::new(sequence, command).encode(buf)
}

/// Read the header at the start of `buf`.
pub fn decode_header(buf: &[u8]) -> Result<Header> {
    Header::decode(buf)
}

/// Append the checksum of `buf[..len]` at `buf[len..]`, returning the total
/// message length.
pub fn finish(buf: &mut [u8], len: usize) -> Result<usize> {
    let total = len + CHECKSUM_SIZE;
    if buf.len() < total {
        return Err(FrameError::BufferExhausted {
            capacity: buf.len(),
        });
    }
    let sum = checksum(&buf[..len]);
    (&mut buf[len..total]).put_u16_le(sum);
    Ok(total)
}

/// Build a complete message (header, payload, checksum) in `buf`.
pub fn encode_message(buf: &mut [u8], header: &Header, payload: &[u8]) -> Result<usize> {
    if payload.len() > MAX_DATA_SIZE {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_DATA_SIZE,
        });
    }
    let mut len = header.encode(buf)?;
    let end = len + payload.len();
    if buf.len() < end {
        return Err(FrameError::BufferExhausted {
            capacity: buf.len(),
        });
    }
    buf[len..end].copy_from_slice(payload);
    len = end;
    finish(buf, len)
}

/// The checksum stored in the last two bytes of `msg`.
pub fn stored_checksum(msg: &[u8]) -> Result<u16> {
    if msg.len() < MIN_MESSAGE_SIZE {
        return Err(FrameError::MessageTooShort {
            len: msg.len(),
            min: MIN_MESSAGE_SIZE,
        });
    }
    let mut tail = &msg[msg.len() - CHECKSUM_SIZE..];
    Ok(tail.get_u16_le())
}

/// The checksum computed over everything in `msg` before its trailer.
pub fn computed_checksum(msg: &[u8]) -> Result<u16> {
    if msg.len() < MIN_MESSAGE_SIZE {
        return Err(FrameError::MessageTooShort {
            len: msg.len(),
            min: MIN_MESSAGE_SIZE,
        });
    }
    Ok(checksum(&msg[..msg.len() - CHECKSUM_SIZE]))
}

/// The payload region of a complete message.
pub fn payload(msg: &[u8]) -> Result<&[u8]> {
    if msg.len() < MIN_MESSAGE_SIZE {
        return Err(FrameError::MessageTooShort {
            len: msg.len(),
            min: MIN_MESSAGE_SIZE,
        });
    }
    Ok(&msg[HEADER_SIZE..msg.len() - CHECKSUM_SIZE])
}
