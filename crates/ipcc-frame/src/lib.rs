//! Wire format of the IPCC host/SP protocol.
//!
//! Every message is a fixed 17-byte header (magic, version, sequence,
//! command), an opaque payload and a Fletcher-16 checksum, byte-stuffed with
//! COBS and terminated by a single `0x00`.
//!
//! Nothing here allocates: encoders and decoders work on caller-supplied
//! slices sized by [`MAX_MESSAGE_SIZE`] and [`MAX_PACKET_SIZE`].

pub mod checksum;
pub mod cobs;
pub mod codec;
pub mod command;
pub mod error;

pub use checksum::{checksum, Fletcher16};
pub use cobs::{max_encoded_len, TERMINATOR};
pub use codec::{
    computed_checksum, decode_header, encode_header, encode_message, finish, payload,
    stored_checksum, Header, CHECKSUM_SIZE, HEADER_SIZE, MAGIC, MAX_DATA_SIZE, MAX_MESSAGE_SIZE,
    MAX_PACKET_SIZE, MIN_MESSAGE_SIZE, SEQ_MASK, SEQ_REPLY, SEQ_UNKNOWN, VERSION,
};
pub use command::{decode_failure_name, host_command_name, key_name, sp_command_name};
pub use error::{FrameError, Result};
