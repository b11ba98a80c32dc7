/// Errors that can occur during framing and message encoding/decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The output buffer filled up before the operation completed.
    /// Any bytes already written are not valid output.
    #[error("output buffer exhausted ({capacity} bytes)")]
    BufferExhausted { capacity: usize },

    /// A run-length code declared more bytes than the frame holds.
    #[error("run of {declared} bytes exceeds {remaining} remaining")]
    Truncated { declared: usize, remaining: usize },

    /// The frame terminator appeared inside framed data.
    #[error("terminator byte inside framed data at offset {offset}")]
    UnexpectedTerminator { offset: usize },

    /// The message is shorter than a header plus checksum.
    #[error("message too short ({len} bytes, min {min})")]
    MessageTooShort { len: usize, min: usize },

    /// The payload does not fit in a single message.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, FrameError>;
