use std::fmt;
use std::io;

use ipcc_host::HostError;
use ipcc_transport::TransportError;

// Exit code constants aligned with rsfulmen/DDR-0002 semantics.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const LINK_UNUSABLE: i32 = 69;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Open { ref source, .. }
        | TransportError::Configure { ref source, .. }
        | TransportError::InterruptLine { ref source, .. }
            if source.kind() == io::ErrorKind::PermissionDenied =>
        {
            CliError::new(PERMISSION_DENIED, format!("{context}: {err}"))
        }
        TransportError::Io(source) => io_error(context, source),
        TransportError::UnsupportedBaud(_) => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn host_error(context: &str, err: HostError) -> CliError {
    match err {
        HostError::Transport(err) => transport_error(context, err),
        HostError::LinkUnusable { .. } => CliError::new(LINK_UNUSABLE, format!("{context}: {err}")),
        HostError::UnexpectedLength { .. }
        | HostError::ReplyTooLarge { .. }
        | HostError::PayloadTooLarge { .. }
        | HostError::MalformedReply { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        HostError::StatusDiverged(_) | HostError::ChannelBusy | HostError::Interrupted => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn link_loss_has_its_own_code() {
        let err = host_error("ident", HostError::LinkUnusable { attempts: 10 });
        assert_eq!(err.code, LINK_UNUSABLE);
        assert!(err.message.starts_with("ident: link unusable"));
    }

    #[test]
    fn open_permission_denied_maps_to_50() {
        let err = transport_error(
            "open",
            TransportError::Open {
                path: PathBuf::from("/dev/ttyS0"),
                source: io::Error::from(io::ErrorKind::PermissionDenied),
            },
        );
        assert_eq!(err.code, PERMISSION_DENIED);

        let err = transport_error(
            "open",
            TransportError::Open {
                path: PathBuf::from("/dev/ttyS0"),
                source: io::Error::from(io::ErrorKind::NotFound),
            },
        );
        assert_eq!(err.code, TRANSPORT_ERROR);
    }

    #[test]
    fn protocol_mismatches_are_data_invalid() {
        let err = host_error(
            "bsu",
            HostError::UnexpectedLength {
                command: "BSU",
                expected: 1,
                actual: 2,
            },
        );
        assert_eq!(err.code, DATA_INVALID);
        assert_eq!(
            host_error("status", HostError::StatusDiverged(0x20)).code,
            FAILURE
        );
    }
}
