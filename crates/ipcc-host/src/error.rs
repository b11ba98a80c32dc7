/// Errors surfaced by the protocol engine and the operations built on it.
///
/// Framing and protocol faults on individual replies never appear here; the
/// engine resolves them by resending or rereading and only reports
/// [`HostError::LinkUnusable`] once its attempt budget is spent.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Transport-level error, passed through without retry.
    #[error("transport error: {0}")]
    Transport(#[from] ipcc_transport::TransportError),

    /// Every attempt at a transaction failed; treat the link as lost.
    #[error("link unusable after {attempts} attempts")]
    LinkUnusable { attempts: u32 },

    /// The SP reported status bits the host does not understand.
    #[error("SP status diverged from protocol (bits {0:#018x})")]
    StatusDiverged(u64),

    /// A well-formed reply had the wrong payload size for its command.
    #[error("{command} reply carried {actual} bytes, expected {expected}")]
    UnexpectedLength {
        command: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A variable-length reply did not fit the caller's buffer.
    #[error("{command} reply of {size} bytes exceeds buffer of {max}")]
    ReplyTooLarge {
        command: &'static str,
        size: usize,
        max: usize,
    },

    /// The request payload does not fit in a single message.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A reply's payload could not be interpreted.
    #[error("malformed {command} reply: {reason}")]
    MalformedReply {
        command: &'static str,
        reason: &'static str,
    },

    /// Cancelled while waiting to acquire the channel.
    #[error("interrupted while waiting for the channel")]
    Interrupted,

    /// The channel is already held (cooperative mode re-entry).
    #[error("channel already active")]
    ChannelBusy,
}

pub type Result<T> = std::result::Result<T, HostError>;
