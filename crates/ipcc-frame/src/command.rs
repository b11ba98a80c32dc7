//! Command identifiers, status bits and result codes.
//!
//! Host-to-SP commands and SP-to-host replies live in separate number spaces.

/// Host requests, `HSS_*`.
pub mod hss {
    pub const REBOOT: u8 = 1;
    pub const POWEROFF: u8 = 2;
    pub const BSU: u8 = 3;
    pub const IDENT: u8 = 4;
    pub const MACS: u8 = 5;
    pub const BOOTFAIL: u8 = 6;
    pub const PANIC: u8 = 7;
    pub const STATUS: u8 = 8;
    pub const ACKSTART: u8 = 9;
    pub const ALERT: u8 = 10;
    pub const ROT: u8 = 11;
    pub const IMAGEBLOCK: u8 = 12;
    pub const KEYLOOKUP: u8 = 13;
    pub const INVENTORY: u8 = 14;
    pub const KEYSET: u8 = 15;
}

/// SP replies, `SP_*`.
pub mod sp {
    pub const NONE: u8 = 0;
    pub const ACK: u8 = 1;
    pub const DECODEFAIL: u8 = 2;
    pub const BSU: u8 = 3;
    pub const IDENT: u8 = 4;
    pub const MACS: u8 = 5;
    pub const STATUS: u8 = 6;
    pub const ALERT: u8 = 7;
    pub const ROT: u8 = 8;
    pub const IMAGEBLOCK: u8 = 9;
    pub const KEYLOOKUP: u8 = 10;
    pub const INVENTORY: u8 = 11;
    pub const KEYSET: u8 = 12;
}

/// SP status register bits.
pub mod status {
    /// The SP has restarted since the host last acknowledged it.
    pub const STARTED: u64 = 1 << 0;
    /// The SP has alerts queued for the host.
    pub const ALERT: u64 = 1 << 1;
    /// Every bit the host knows how to service.
    pub const KNOWN: u64 = STARTED | ALERT;
}

/// Reason byte carried by an `SP_DECODEFAIL` reply.
pub mod decode_failure {
    pub const COBS: u8 = 1;
    pub const CHECKSUM: u8 = 2;
    pub const DESERIALIZE: u8 = 3;
    pub const MAGIC: u8 = 4;
    pub const VERSION: u8 = 5;
    pub const SEQUENCE: u8 = 6;
    pub const DATA_LENGTH: u8 = 7;
}

/// Well-known key-lookup keys.
pub mod key {
    /// Liveness check; the SP answers `pong`.
    pub const PING: u8 = 0;
    pub const INSTALLINATOR_IMAGE_ID: u8 = 1;
    pub const INVENTORY: u8 = 2;
    pub const ETC_SYSTEM: u8 = 3;
    pub const DTRACE_CONF: u8 = 4;
}

/// Returns a human-readable name for a host command.
pub fn host_command_name(cmd: u8) -> &'static str {
    match cmd {
        hss::REBOOT => "REBOOT",
        hss::POWEROFF => "POWEROFF",
        hss::BSU => "BSU",
        hss::IDENT => "IDENT",
        hss::MACS => "MACS",
        hss::BOOTFAIL => "BOOTFAIL",
        hss::PANIC => "PANIC",
        hss::STATUS => "STATUS",
        hss::ACKSTART => "ACKSTART",
        hss::ALERT => "ALERT",
        hss::ROT => "ROT",
        hss::IMAGEBLOCK => "IMAGEBLOCK",
        hss::KEYLOOKUP => "KEYLOOKUP",
        hss::INVENTORY => "INVENTORY",
        hss::KEYSET => "KEYSET",
        _ => "UNKNOWN",
    }
}

/// Returns a human-readable name for an SP reply.
pub fn sp_command_name(cmd: u8) -> &'static str {
    match cmd {
        sp::NONE => "NONE",
        sp::ACK => "ACK",
        sp::DECODEFAIL => "DECODEFAIL",
        sp::BSU => "BSU",
        sp::IDENT => "IDENT",
        sp::MACS => "MACS",
        sp::STATUS => "STATUS",
        sp::ALERT => "ALERT",
        sp::ROT => "ROT",
        sp::IMAGEBLOCK => "IMAGEBLOCK",
        sp::KEYLOOKUP => "KEYLOOKUP",
        sp::INVENTORY => "INVENTORY",
        sp::KEYSET => "KEYSET",
        _ => "UNKNOWN",
    }
}

/// Returns a human-readable name for a well-known key.
pub fn key_name(id: u8) -> &'static str {
    match id {
        key::PING => "ping",
        key::INSTALLINATOR_IMAGE_ID => "installinator-image-id",
        key::INVENTORY => "inventory",
        key::ETC_SYSTEM => "etc-system",
        key::DTRACE_CONF => "dtrace-conf",
        _ => "unknown",
    }
}

/// Returns a human-readable description of a decode-failure reason.
pub fn decode_failure_name(reason: u8) -> &'static str {
    match reason {
        decode_failure::COBS => "framing",
        decode_failure::CHECKSUM => "checksum",
        decode_failure::DESERIALIZE => "deserialize",
        decode_failure::MAGIC => "magic",
        decode_failure::VERSION => "version",
        decode_failure::SEQUENCE => "sequence",
        decode_failure::DATA_LENGTH => "data length",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_host_command_is_named() {
        for cmd in hss::REBOOT..=hss::KEYSET {
            assert_ne!(host_command_name(cmd), "UNKNOWN", "command {cmd}");
        }
        assert_eq!(host_command_name(0), "UNKNOWN");
    }

    #[test]
    fn every_sp_reply_is_named() {
        for cmd in sp::NONE..=sp::KEYSET {
            assert_ne!(sp_command_name(cmd), "UNKNOWN", "reply {cmd}");
        }
        assert_eq!(sp_command_name(200), "UNKNOWN");
    }

    #[test]
    fn known_status_bits() {
        assert_eq!(status::KNOWN, 0b11);
        assert_eq!(decode_failure_name(decode_failure::CHECKSUM), "checksum");
        assert_eq!(decode_failure_name(0), "unknown");
    }

    #[test]
    fn key_names() {
        assert_eq!(key_name(key::PING), "ping");
        assert_eq!(key_name(key::DTRACE_CONF), "dtrace-conf");
        assert_eq!(key_name(99), "unknown");
    }
}
