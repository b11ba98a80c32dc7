//! The command engine: one request/reply transaction with bounded retry.
//!
//! A transaction moves through [`Step`]s. Framing faults, protocol faults and
//! interrupts all lead back to `Send`, which spends one attempt; a reply
//! carrying a stale sequence number or an empty keep-alive frame leads back
//! to `Receive`, which does not.

use std::ops::Range;

use ipcc_frame::command::{decode_failure_name, sp};
use ipcc_frame::{
    cobs, computed_checksum, decode_header, encode_header, finish, host_command_name,
    sp_command_name, stored_checksum, FrameError, CHECKSUM_SIZE, HEADER_SIZE, MAGIC,
    MAX_DATA_SIZE, MAX_MESSAGE_SIZE, MAX_PACKET_SIZE, MIN_MESSAGE_SIZE, SEQ_MASK, SEQ_REPLY,
    SEQ_UNKNOWN, TERMINATOR, VERSION,
};
use ipcc_transport::IpccOps;
use tracing::Level;

use crate::channel::{ChannelGuard, Resources};
use crate::config::EngineConfig;
use crate::error::{HostError, Result};
use crate::io::{LinkError, Received};

/// The sequence number that follows `current`.
///
/// Never yields a value with [`SEQ_REPLY`] set; past the top of the space
/// the counter wraps to 1, so 0 is only ever the initial state.
pub fn next_sequence(current: u64) -> u64 {
    let next = current.wrapping_add(1);
    if next & SEQ_REPLY != 0 {
        1
    } else {
        next
    }
}

/// Why a decoded reply was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("framing: {0}")]
    Framing(FrameError),

    #[error("short message ({len} bytes)")]
    TooShort { len: usize },

    #[error("checksum mismatch (stored {stored:#06x}, computed {computed:#06x})")]
    Checksum { stored: u16, computed: u16 },

    #[error("bad magic {0:#010x}")]
    Magic(u32),

    #[error("bad version {0}")]
    Version(u32),

    #[error("sequence {sequence:#x} is not a reply")]
    NotReply { sequence: u64 },

    #[error("SP could not decode the request ({})", reason_name(.reason))]
    DecodeFailure { reason: Option<u8> },

    #[error("stale reply (sequence {received:#x}, expected {expected:#x})")]
    StaleSequence { expected: u64, received: u64 },

    #[error("unexpected reply {} (expected {})", reply_name(.received), reply_name(.expected))]
    UnexpectedCommand { expected: u8, received: u8 },
}

fn reason_name(reason: &Option<u8>) -> &'static str {
    reason.map_or("no reason", decode_failure_name)
}

fn reply_name(command: &u8) -> &'static str {
    sp_command_name(*command)
}

impl Rejection {
    /// Whether the request has to go out again. Otherwise the reply is
    /// discarded and the engine keeps reading.
    pub fn requires_resend(&self) -> bool {
        !matches!(self, Self::StaleSequence { .. })
    }
}

/// Checks a decoded message against the request it should answer and
/// returns the range of its payload.
pub fn check_reply(
    msg: &[u8],
    sequence: u64,
    expected: u8,
) -> std::result::Result<Range<usize>, Rejection> {
    if msg.len() < MIN_MESSAGE_SIZE {
        return Err(Rejection::TooShort { len: msg.len() });
    }

    let stored = stored_checksum(msg).map_err(Rejection::Framing)?;
    let computed = computed_checksum(msg).map_err(Rejection::Framing)?;
    if stored != computed {
        return Err(Rejection::Checksum { stored, computed });
    }

    let header = decode_header(msg).map_err(Rejection::Framing)?;
    if header.magic != MAGIC {
        return Err(Rejection::Magic(header.magic));
    }
    if header.version != VERSION {
        return Err(Rejection::Version(header.version));
    }
    if header.sequence & SEQ_REPLY == 0 {
        return Err(Rejection::NotReply {
            sequence: header.sequence,
        });
    }

    let payload = HEADER_SIZE..msg.len() - CHECKSUM_SIZE;
    let reason = msg[payload.clone()].first().copied();

    // The SP could not recover the sequence number of what it received, so
    // this reply is about whatever we sent last.
    if header.command == sp::DECODEFAIL && header.sequence == SEQ_UNKNOWN {
        return Err(Rejection::DecodeFailure { reason });
    }

    let received = header.sequence & SEQ_MASK;
    if received != sequence {
        return Err(Rejection::StaleSequence {
            expected: sequence,
            received,
        });
    }
    if header.command == sp::DECODEFAIL {
        return Err(Rejection::DecodeFailure { reason });
    }
    if header.command != expected {
        return Err(Rejection::UnexpectedCommand {
            expected,
            received: header.command,
        });
    }

    Ok(payload)
}

/// One outbound request and what is expected back.
struct Request<'p> {
    command: u8,
    sequence: u64,
    reply: Option<u8>,
    parts: &'p [&'p [u8]],
    expected_len: usize,
}

enum Step {
    Send,
    Receive(u8),
    Validate(usize, u8),
    Done(Range<usize>),
    Exhausted,
}

/// Runs transactions on a held channel.
///
/// A session borrows the channel's buffers through its guard, so at most one
/// exists per channel at a time. The slice returned by [`Session::execute`]
/// points into those buffers and is valid until the next transaction.
pub struct Session<'a, O: IpccOps> {
    pub(crate) res: &'a mut Resources,
    pub(crate) ops: &'a mut O,
    pub(crate) config: &'a EngineConfig,
    pub(crate) check_intr: bool,
}

impl<'a, O: IpccOps> Session<'a, O> {
    pub fn new(guard: &'a mut ChannelGuard<'_>, ops: &'a mut O, config: &'a EngineConfig) -> Self {
        Self {
            res: guard.resources(),
            ops,
            config,
            check_intr: true,
        }
    }

    /// Last sequence number used on this channel.
    pub fn sequence(&self) -> u64 {
        self.res.sequence()
    }

    /// Sends `command` with `payload` and waits for a reply of type `reply`.
    ///
    /// With `reply` of `None` the call returns an empty slice as soon as the
    /// request is written. A non-zero `expected_len` must match the reply's
    /// payload size exactly; zero accepts any size.
    pub fn execute(
        &mut self,
        command: u8,
        reply: Option<u8>,
        payload: &[u8],
        expected_len: usize,
    ) -> Result<&[u8]> {
        self.execute_vectored(command, reply, &[payload], expected_len)
    }

    /// Like [`Session::execute`] with the payload given as consecutive parts.
    pub fn execute_vectored(
        &mut self,
        command: u8,
        reply: Option<u8>,
        parts: &[&[u8]],
        expected_len: usize,
    ) -> Result<&[u8]> {
        let range = self.transact(command, reply, parts, expected_len)?;
        Ok(&self.res.msg[range])
    }

    pub(crate) fn transact(
        &mut self,
        command: u8,
        reply: Option<u8>,
        parts: &[&[u8]],
        expected_len: usize,
    ) -> Result<Range<usize>> {
        let size: usize = parts.iter().map(|part| part.len()).sum();
        if size > MAX_DATA_SIZE {
            return Err(HostError::PayloadTooLarge {
                size,
                max: MAX_DATA_SIZE,
            });
        }

        let name = host_command_name(command);
        if self.check_intr && self.ops.readintr() {
            self.ops.log(
                Level::DEBUG,
                format_args!("SP interrupt pending before {name}"),
            );
            self.service_interrupt()?;
        }

        let request = Request {
            command,
            sequence: self.res.advance_sequence(),
            reply,
            parts,
            expected_len,
        };

        let mut attempts = 0;
        let mut step = Step::Send;
        loop {
            step = match step {
                Step::Send if attempts >= self.config.max_attempts => Step::Exhausted,
                Step::Send => {
                    attempts += 1;
                    self.send_request(&request)?
                }
                Step::Receive(expected) => self.await_reply(expected)?,
                Step::Validate(len, expected) => self.validate(&request, len, expected)?,
                Step::Done(range) => return Ok(range),
                Step::Exhausted => {
                    self.ops.log(
                        Level::ERROR,
                        format_args!("{name} failed after {attempts} attempts"),
                    );
                    return Err(HostError::LinkUnusable { attempts });
                }
            };
        }
    }

    fn send_request(&mut self, request: &Request<'_>) -> Result<Step> {
        let name = host_command_name(request.command);
        let len = match self.build_packet(request) {
            Ok(len) => len,
            Err(err) => {
                self.ops.log(
                    Level::DEBUG,
                    format_args!("failed to frame {name}: {err}; resending"),
                );
                return Ok(Step::Send);
            }
        };

        match self.send_packet(len) {
            Ok(()) => Ok(match request.reply {
                Some(expected) => Step::Receive(expected),
                None => Step::Done(0..0),
            }),
            Err(LinkError::Interrupted) => {
                self.ops.log(
                    Level::DEBUG,
                    format_args!("SP interrupted while sending {name}"),
                );
                self.service_interrupt()?;
                Ok(Step::Send)
            }
            Err(LinkError::Transport(err)) => Err(err.into()),
        }
    }

    fn build_packet(&mut self, request: &Request<'_>) -> ipcc_frame::Result<usize> {
        let res = &mut *self.res;
        let mut len = encode_header(&mut res.msg, request.sequence, request.command)?;
        for part in request.parts {
            let end = len + part.len();
            res.msg
                .get_mut(len..end)
                .ok_or(FrameError::BufferExhausted {
                    capacity: MAX_MESSAGE_SIZE,
                })?
                .copy_from_slice(part);
            len = end;
        }
        let len = finish(&mut res.msg, len)?;

        let encoded = cobs::encode(&res.msg[..len], &mut res.pkt[..MAX_PACKET_SIZE - 1])?;
        res.pkt[encoded] = TERMINATOR;
        Ok(encoded + 1)
    }

    fn await_reply(&mut self, expected: u8) -> Result<Step> {
        match self.recv_packet() {
            Ok(Received::Frame(0)) => {
                self.ops.log(
                    Level::TRACE,
                    format_args!("empty frame from SP; reading again"),
                );
                Ok(Step::Receive(expected))
            }
            Ok(Received::Frame(len)) => Ok(Step::Validate(len, expected)),
            Ok(Received::Overflow) => {
                self.ops.log(
                    Level::DEBUG,
                    format_args!("no frame terminator in {MAX_PACKET_SIZE} bytes; resending"),
                );
                Ok(Step::Send)
            }
            Ok(Received::Silent(keepalives)) => {
                self.ops.log(
                    Level::DEBUG,
                    format_args!("no reply after {keepalives} keep-alives; resending"),
                );
                Ok(Step::Send)
            }
            Err(LinkError::Interrupted) => {
                self.ops.log(
                    Level::DEBUG,
                    format_args!("SP interrupted while awaiting reply"),
                );
                self.service_interrupt()?;
                Ok(Step::Send)
            }
            Err(LinkError::Transport(err)) => Err(err.into()),
        }
    }

    fn validate(&mut self, request: &Request<'_>, len: usize, expected: u8) -> Result<Step> {
        let name = host_command_name(request.command);
        let res = &mut *self.res;
        let decoded = match cobs::decode(&res.pkt[..len], &mut res.msg) {
            Ok(decoded) => decoded,
            Err(err) => {
                self.ops.log(
                    Level::DEBUG,
                    format_args!("undecodable {name} reply: {err}; resending"),
                );
                return Ok(Step::Send);
            }
        };

        match check_reply(&self.res.msg[..decoded], request.sequence, expected) {
            Ok(payload) => {
                if request.expected_len != 0 && payload.len() != request.expected_len {
                    self.ops.log(
                        Level::ERROR,
                        format_args!(
                            "{name} reply carried {} bytes, expected {}",
                            payload.len(),
                            request.expected_len
                        ),
                    );
                    return Err(HostError::UnexpectedLength {
                        command: name,
                        expected: request.expected_len,
                        actual: payload.len(),
                    });
                }
                Ok(Step::Done(payload))
            }
            Err(rejection) if rejection.requires_resend() => {
                self.ops.log(
                    Level::DEBUG,
                    format_args!("rejected {name} reply: {rejection}; resending"),
                );
                Ok(Step::Send)
            }
            Err(rejection) => {
                self.ops.log(
                    Level::DEBUG,
                    format_args!("ignored {name} reply: {rejection}; reading again"),
                );
                Ok(Step::Receive(expected))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::sim::{Fault, SimulatedSp};
    use ipcc_frame::command::{hss, status};
    use ipcc_frame::{encode_message, Header};
    use ipcc_transport::{PollEvents, TransportError};
    use proptest::prelude::*;
    use std::time::Duration;

    fn reply(sequence: u64, command: u8, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; MAX_MESSAGE_SIZE];
        let header = Header::new(sequence | SEQ_REPLY, command);
        let len = encode_message(&mut buf, &header, payload).unwrap();
        buf.truncate(len);
        buf
    }

    fn run<T>(sp: &mut SimulatedSp, f: impl FnOnce(&mut Session<'_, SimulatedSp>) -> T) -> T {
        let channel = Channel::new();
        let config = EngineConfig::default();
        let mut guard = channel.acquire(None).unwrap();
        let mut session = Session::new(&mut guard, sp, &config);
        f(&mut session)
    }

    #[test]
    fn sequence_starts_at_one_and_skips_reply_bit() {
        assert_eq!(next_sequence(0), 1);
        assert_eq!(next_sequence(41), 42);
        assert_eq!(next_sequence(SEQ_MASK), 1);
    }

    proptest! {
        #[test]
        fn next_sequence_never_sets_reply_bit(current in any::<u64>()) {
            let next = next_sequence(current);
            prop_assert_eq!(next & SEQ_REPLY, 0);
            prop_assert_ne!(next, 0);
            if current < SEQ_MASK {
                prop_assert_eq!(next, current + 1);
            }
        }
    }

    #[test]
    fn check_reply_accepts_matching_reply() {
        let msg = reply(7, sp::BSU, &[0x41]);
        let payload = check_reply(&msg, 7, sp::BSU).unwrap();
        assert_eq!(&msg[payload], &[0x41]);
    }

    #[test]
    fn check_reply_classifies_faults() {
        let mut corrupt = reply(7, sp::BSU, &[0x41]);
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xFF;
        assert!(matches!(
            check_reply(&corrupt, 7, sp::BSU),
            Err(Rejection::Checksum { .. })
        ));

        assert_eq!(
            check_reply(&[0u8; 10], 7, sp::BSU),
            Err(Rejection::TooShort { len: 10 })
        );

        let stale = check_reply(&reply(6, sp::BSU, &[0x41]), 7, sp::BSU).unwrap_err();
        assert_eq!(
            stale,
            Rejection::StaleSequence {
                expected: 7,
                received: 6
            }
        );
        assert!(!stale.requires_resend());

        let wrong = check_reply(&reply(7, sp::ACK, &[]), 7, sp::BSU).unwrap_err();
        assert!(wrong.requires_resend());
        assert!(matches!(wrong, Rejection::UnexpectedCommand { .. }));
    }

    #[test]
    fn check_reply_rejects_requests() {
        let mut buf = vec![0u8; MAX_MESSAGE_SIZE];
        let len = encode_message(&mut buf, &Header::new(7, sp::BSU), &[1]).unwrap();
        assert_eq!(
            check_reply(&buf[..len], 7, sp::BSU),
            Err(Rejection::NotReply { sequence: 7 })
        );
    }

    #[test]
    fn decode_failure_sentinel_skips_sequence_check() {
        let mut buf = vec![0u8; MAX_MESSAGE_SIZE];
        let header = Header::new(SEQ_UNKNOWN, sp::DECODEFAIL);
        let len = encode_message(&mut buf, &header, &[2]).unwrap();
        let rejection = check_reply(&buf[..len], 7, sp::BSU).unwrap_err();
        assert_eq!(rejection, Rejection::DecodeFailure { reason: Some(2) });
        assert!(rejection.requires_resend());
        assert!(rejection.to_string().contains("checksum"));

        // With a real sequence number, a mismatch is just a stale reply.
        let stale = check_reply(&reply(3, sp::DECODEFAIL, &[2]), 7, sp::BSU).unwrap_err();
        assert!(!stale.requires_resend());
    }

    #[test]
    fn bad_magic_and_version_require_resend() {
        let mut buf = vec![0u8; MAX_MESSAGE_SIZE];
        let mut header = Header::new(7 | SEQ_REPLY, sp::BSU);
        header.magic ^= 1;
        let len = encode_message(&mut buf, &header, &[]).unwrap();
        assert!(matches!(
            check_reply(&buf[..len], 7, sp::BSU),
            Err(Rejection::Magic(_))
        ));

        let mut header = Header::new(7 | SEQ_REPLY, sp::BSU);
        header.version = 2;
        let len = encode_message(&mut buf, &header, &[]).unwrap();
        assert_eq!(
            check_reply(&buf[..len], 7, sp::BSU),
            Err(Rejection::Version(2))
        );
    }

    #[test]
    fn execute_returns_reply_payload() {
        let mut sp = SimulatedSp::new();
        let bsu = run(&mut sp, |s| s.execute(hss::BSU, Some(sp::BSU), &[], 1).unwrap().to_vec());
        assert_eq!(bsu, vec![b'A']);
        assert_eq!(sp.frames_received(), 1);
    }

    #[test]
    fn sequence_advances_once_per_transaction() {
        let mut sp = SimulatedSp::new();
        sp.inject(Fault::CorruptChecksum);
        run(&mut sp, |s| {
            s.execute(hss::BSU, Some(sp::BSU), &[], 1).unwrap();
            assert_eq!(s.sequence(), 1);
            s.execute(hss::BSU, Some(sp::BSU), &[], 1).unwrap();
            assert_eq!(s.sequence(), 2);
        });
        let sequences: Vec<u64> = sp.requests().iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![1, 1, 2]);
    }

    #[test]
    fn sequence_wraps_without_reply_bit() {
        let mut sp = SimulatedSp::new();
        let channel = Channel::new();
        let config = EngineConfig::default();
        let mut guard = channel.acquire(None).unwrap();
        guard.resources().set_sequence(SEQ_MASK);
        let mut session = Session::new(&mut guard, &mut sp, &config);
        session.execute(hss::BSU, Some(sp::BSU), &[], 1).unwrap();
        assert_eq!(session.sequence(), 1);
        drop(session);
        assert_eq!(sp.requests()[0].sequence, 1);
    }

    #[test]
    fn persistent_corruption_spends_every_attempt() {
        let mut sp = SimulatedSp::new();
        sp.always(Fault::CorruptChecksum);
        let err = run(&mut sp, |s| s.execute(hss::BSU, Some(sp::BSU), &[], 1).map(<[u8]>::to_vec));
        assert!(matches!(err, Err(HostError::LinkUnusable { attempts: 10 })));
        assert_eq!(sp.frames_received(), 10);
    }

    #[test]
    fn custom_attempt_budget_is_honoured() {
        let mut sp = SimulatedSp::new();
        sp.always(Fault::WrongCommand);
        let channel = Channel::new();
        let config = EngineConfig {
            max_attempts: 3,
            ..EngineConfig::default()
        };
        let mut guard = channel.acquire(None).unwrap();
        let mut session = Session::new(&mut guard, &mut sp, &config);
        let err = session.execute(hss::BSU, Some(sp::BSU), &[], 1).unwrap_err();
        assert!(matches!(err, HostError::LinkUnusable { attempts: 3 }));
        drop(session);
        assert_eq!(sp.frames_received(), 3);
    }

    #[test]
    fn stale_reply_does_not_spend_an_attempt() {
        let mut sp = SimulatedSp::new();
        sp.inject(Fault::StaleSequence);
        let bsu = run(&mut sp, |s| s.execute(hss::BSU, Some(sp::BSU), &[], 1).unwrap().to_vec());
        assert_eq!(bsu, vec![b'A']);
        assert_eq!(sp.frames_received(), 1);
    }

    #[test]
    fn keepalive_frame_before_reply_is_skipped() {
        let mut sp = SimulatedSp::new();
        sp.inject(Fault::KeepAliveFirst);
        run(&mut sp, |s| s.execute(hss::BSU, Some(sp::BSU), &[], 1).unwrap().to_vec());
        assert_eq!(sp.frames_received(), 1);
    }

    #[test]
    fn decode_failure_reply_triggers_resend() {
        let mut sp = SimulatedSp::new();
        sp.inject(Fault::DecodeFailure);
        run(&mut sp, |s| s.execute(hss::BSU, Some(sp::BSU), &[], 1).unwrap().to_vec());
        assert_eq!(sp.frames_received(), 2);
    }

    #[test]
    fn wrong_length_is_fatal_without_retry() {
        let mut sp = SimulatedSp::new();
        sp.inject(Fault::ExtraByte);
        let err = run(&mut sp, |s| s.execute(hss::BSU, Some(sp::BSU), &[], 1).map(<[u8]>::to_vec));
        match err {
            Err(HostError::UnexpectedLength {
                command,
                expected,
                actual,
            }) => {
                assert_eq!(command, "BSU");
                assert_eq!(expected, 1);
                assert_eq!(actual, 2);
            }
            other => panic!("expected UnexpectedLength, got {other:?}"),
        }
        assert_eq!(sp.frames_received(), 1);
    }

    #[test]
    fn silent_peer_gets_keepalives_then_resends() {
        let mut sp = SimulatedSp::new();
        sp.always(Fault::Silence);
        let channel = Channel::new();
        let config = EngineConfig {
            max_attempts: 2,
            poll_timeout: Duration::from_millis(1),
            keepalive_limit: Some(3),
        };
        let mut guard = channel.acquire(None).unwrap();
        let mut session = Session::new(&mut guard, &mut sp, &config);
        let err = session.execute(hss::BSU, Some(sp::BSU), &[], 1).unwrap_err();
        assert!(matches!(err, HostError::LinkUnusable { attempts: 2 }));
        drop(session);
        assert_eq!(sp.frames_received(), 2);
        assert_eq!(sp.keepalives(), 6);
    }

    #[test]
    fn no_reply_expected_returns_after_send() {
        let mut sp = SimulatedSp::new();
        let reply = run(&mut sp, |s| s.execute(hss::POWEROFF, None, &[], 0).unwrap().len());
        assert_eq!(reply, 0);
        assert_eq!(sp.commands(), vec![hss::POWEROFF]);
    }

    #[test]
    fn oversized_payload_is_refused_before_sending() {
        let mut sp = SimulatedSp::new();
        let big = vec![1u8; MAX_DATA_SIZE + 1];
        let err = run(&mut sp, |s| s.execute(hss::ROT, Some(sp::ROT), &big, 0).map(<[u8]>::to_vec));
        assert!(matches!(err, Err(HostError::PayloadTooLarge { .. })));
        assert_eq!(sp.frames_received(), 0);
    }

    #[test]
    fn largest_payload_round_trips() {
        let mut sp = SimulatedSp::new();
        let data: Vec<u8> = (0..MAX_DATA_SIZE).map(|i| (i % 251) as u8).collect();
        let echoed = run(&mut sp, |s| s.execute(hss::ROT, Some(sp::ROT), &data, 0).unwrap().to_vec());
        assert_eq!(echoed, data);
    }

    #[test]
    fn vectored_parts_are_concatenated() {
        let mut sp = SimulatedSp::new();
        let echoed = run(&mut sp, |s| {
            s.execute_vectored(hss::ROT, Some(sp::ROT), &[&b"ab"[..], &b""[..], &b"cd"[..]], 4)
                .unwrap()
                .to_vec()
        });
        assert_eq!(echoed, b"abcd");
    }

    #[test]
    fn interrupt_pending_before_write_is_serviced_first() {
        let mut sp = SimulatedSp::new().with_status(status::STARTED);
        run(&mut sp, |s| s.execute(hss::BSU, Some(sp::BSU), &[], 1).unwrap().to_vec());
        assert_eq!(
            sp.commands(),
            vec![hss::STATUS, hss::ACKSTART, hss::STATUS, hss::BSU]
        );
    }

    #[test]
    fn interrupt_during_reply_wait_resends_after_service() {
        let mut sp = SimulatedSp::new();
        sp.inject(Fault::RaiseStatus(status::STARTED));
        run(&mut sp, |s| s.execute(hss::BSU, Some(sp::BSU), &[], 1).unwrap().to_vec());
        assert_eq!(
            sp.commands(),
            vec![hss::BSU, hss::STATUS, hss::ACKSTART, hss::STATUS, hss::BSU]
        );
    }

    struct FailingWrite;

    impl IpccOps for FailingWrite {
        fn poll(
            &mut self,
            events: PollEvents,
            _timeout: Option<Duration>,
        ) -> ipcc_transport::Result<PollEvents> {
            Ok(events & PollEvents::WRITE)
        }

        fn read(&mut self, _buf: &mut [u8]) -> ipcc_transport::Result<usize> {
            Ok(0)
        }

        fn write(&mut self, _buf: &[u8]) -> ipcc_transport::Result<usize> {
            Err(TransportError::Closed)
        }
    }

    #[test]
    fn transport_errors_pass_through_without_retry() {
        let channel = Channel::new();
        let config = EngineConfig::default();
        let mut ops = FailingWrite;
        let mut guard = channel.acquire(None).unwrap();
        let mut session = Session::new(&mut guard, &mut ops, &config);
        let err = session.execute(hss::BSU, Some(sp::BSU), &[], 1).unwrap_err();
        assert!(matches!(
            err,
            HostError::Transport(TransportError::Closed)
        ));
    }

    /// Runs `f` on its own thread and fails the test if it has not finished
    /// within a few seconds.
    fn bounded<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let _ = tx.send(f());
        });
        rx.recv_timeout(Duration::from_secs(5))
            .expect("transaction did not finish in time")
    }

    fn execute_bsu<O: IpccOps>(ops: &mut O, config: &EngineConfig) -> Result<Vec<u8>> {
        let channel = Channel::new();
        let mut guard = channel.acquire(None).unwrap();
        let mut session = Session::new(&mut guard, ops, config);
        session
            .execute(hss::BSU, Some(sp::BSU), &[], 1)
            .map(<[u8]>::to_vec)
    }

    /// A hung-up tty: always ready, never any bytes.
    struct HungUp;

    impl IpccOps for HungUp {
        fn poll(
            &mut self,
            events: PollEvents,
            _timeout: Option<Duration>,
        ) -> ipcc_transport::Result<PollEvents> {
            Ok(events & (PollEvents::READ | PollEvents::WRITE))
        }

        fn read(&mut self, _buf: &mut [u8]) -> ipcc_transport::Result<usize> {
            Ok(0)
        }

        fn write(&mut self, buf: &[u8]) -> ipcc_transport::Result<usize> {
            Ok(buf.len())
        }
    }

    #[test]
    fn hung_up_transport_is_reported_not_spun_on() {
        let err = bounded(|| {
            let config = EngineConfig {
                max_attempts: 2,
                poll_timeout: Duration::from_millis(1),
                keepalive_limit: Some(3),
            };
            execute_bsu(&mut HungUp, &config)
        })
        .unwrap_err();
        assert!(matches!(err, HostError::Transport(TransportError::Closed)));
    }

    /// Writable forever, but every write is refused.
    struct StuckWrite;

    impl IpccOps for StuckWrite {
        fn poll(
            &mut self,
            events: PollEvents,
            _timeout: Option<Duration>,
        ) -> ipcc_transport::Result<PollEvents> {
            Ok(events & PollEvents::WRITE)
        }

        fn read(&mut self, _buf: &mut [u8]) -> ipcc_transport::Result<usize> {
            Ok(0)
        }

        fn write(&mut self, _buf: &[u8]) -> ipcc_transport::Result<usize> {
            Ok(0)
        }
    }

    #[test]
    fn refused_writes_are_reported_not_spun_on() {
        let err = bounded(|| execute_bsu(&mut StuckWrite, &EngineConfig::default())).unwrap_err();
        assert!(matches!(err, HostError::Transport(TransportError::Closed)));
    }

    /// Answers every request with a stream of bytes that never terminates.
    #[derive(Default)]
    struct Flood {
        frames: usize,
    }

    impl IpccOps for Flood {
        fn poll(
            &mut self,
            events: PollEvents,
            _timeout: Option<Duration>,
        ) -> ipcc_transport::Result<PollEvents> {
            Ok(events & (PollEvents::READ | PollEvents::WRITE))
        }

        fn read(&mut self, buf: &mut [u8]) -> ipcc_transport::Result<usize> {
            buf.fill(0x55);
            Ok(buf.len())
        }

        fn write(&mut self, buf: &[u8]) -> ipcc_transport::Result<usize> {
            self.frames += buf.iter().filter(|&&b| b == TERMINATOR).count();
            Ok(buf.len())
        }
    }

    #[test]
    fn missing_terminator_resends_until_budget_is_spent() {
        let (result, frames) = bounded(|| {
            let mut ops = Flood::default();
            let config = EngineConfig {
                max_attempts: 3,
                ..EngineConfig::default()
            };
            let result = execute_bsu(&mut ops, &config);
            (result, ops.frames)
        });
        assert!(matches!(result, Err(HostError::LinkUnusable { attempts: 3 })));
        assert_eq!(frames, 3);
    }

    #[test]
    fn persistent_corruption_terminates_promptly() {
        let (result, frames) = bounded(|| {
            let mut sp = SimulatedSp::new();
            sp.always(Fault::CorruptChecksum);
            let result = execute_bsu(&mut sp, &EngineConfig::default());
            (result, sp.frames_received())
        });
        assert!(matches!(result, Err(HostError::LinkUnusable { attempts: 10 })));
        assert_eq!(frames, 10);
    }

    #[test]
    fn undecodable_reply_frame_triggers_resend() {
        let mut sp = SimulatedSp::new();
        sp.inject(Fault::BrokenFraming);
        let bsu = execute_bsu(&mut sp, &EngineConfig::default()).unwrap();
        assert_eq!(bsu, vec![b'A']);
        assert_eq!(sp.frames_received(), 2);
        assert!(sp
            .logs()
            .iter()
            .any(|(_, line)| line.starts_with("undecodable BSU reply")));
    }

    #[test]
    fn decode_failure_for_current_sequence_triggers_resend() {
        let mut sp = SimulatedSp::new();
        sp.inject(Fault::SequencedDecodeFailure);
        let bsu = execute_bsu(&mut sp, &EngineConfig::default()).unwrap();
        assert_eq!(bsu, vec![b'A']);
        assert_eq!(sp.frames_received(), 2);
        let sequences: Vec<u64> = sp.requests().iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![1, 1]);
    }

    #[test]
    fn check_reply_resends_on_decode_failure_for_current_sequence() {
        let rejection = check_reply(&reply(7, sp::DECODEFAIL, &[7]), 7, sp::BSU).unwrap_err();
        assert_eq!(rejection, Rejection::DecodeFailure { reason: Some(7) });
        assert!(rejection.requires_resend());
    }

    /// Accepts every write except a lone keep-alive terminator.
    struct RefusesKeepalives(SimulatedSp);

    impl IpccOps for RefusesKeepalives {
        fn flush(&mut self) {
            self.0.flush()
        }

        fn poll(
            &mut self,
            events: PollEvents,
            timeout: Option<Duration>,
        ) -> ipcc_transport::Result<PollEvents> {
            self.0.poll(events, timeout)
        }

        fn readintr(&mut self) -> bool {
            self.0.readintr()
        }

        fn read(&mut self, buf: &mut [u8]) -> ipcc_transport::Result<usize> {
            self.0.read(buf)
        }

        fn write(&mut self, buf: &[u8]) -> ipcc_transport::Result<usize> {
            if buf == [TERMINATOR] {
                return Ok(0);
            }
            self.0.write(buf)
        }

        fn log(&mut self, level: tracing::Level, args: std::fmt::Arguments<'_>) {
            self.0.log(level, args)
        }
    }

    #[test]
    fn refused_keepalive_is_logged() {
        let mut sp = SimulatedSp::new();
        sp.always(Fault::Silence);
        let mut ops = RefusesKeepalives(sp);
        let config = EngineConfig {
            max_attempts: 2,
            poll_timeout: Duration::from_millis(1),
            keepalive_limit: Some(3),
        };
        let err = execute_bsu(&mut ops, &config).unwrap_err();
        assert!(matches!(err, HostError::LinkUnusable { attempts: 2 }));
        assert_eq!(ops.0.frames_received(), 2);
        assert_eq!(ops.0.keepalives(), 0);
        let refused = ops
            .0
            .logs()
            .iter()
            .filter(|(_, line)| line == "keep-alive not accepted by transport")
            .count();
        assert_eq!(refused, 6);
    }

    /// Raises the SP's restart bit the first time the host waits to write.
    struct InterruptOnWrite {
        sp: SimulatedSp,
        armed: bool,
    }

    impl IpccOps for InterruptOnWrite {
        fn flush(&mut self) {
            self.sp.flush()
        }

        fn poll(
            &mut self,
            events: PollEvents,
            timeout: Option<Duration>,
        ) -> ipcc_transport::Result<PollEvents> {
            if self.armed && events.contains(PollEvents::WRITE | PollEvents::INTR) {
                self.armed = false;
                self.sp.raise_status(status::STARTED);
                return Ok(PollEvents::INTR);
            }
            self.sp.poll(events, timeout)
        }

        fn readintr(&mut self) -> bool {
            self.sp.readintr()
        }

        fn read(&mut self, buf: &mut [u8]) -> ipcc_transport::Result<usize> {
            self.sp.read(buf)
        }

        fn write(&mut self, buf: &[u8]) -> ipcc_transport::Result<usize> {
            self.sp.write(buf)
        }
    }

    #[test]
    fn interrupt_while_sending_is_serviced_then_resent() {
        let mut ops = InterruptOnWrite {
            sp: SimulatedSp::new(),
            armed: true,
        };
        let bsu = execute_bsu(&mut ops, &EngineConfig::default()).unwrap();
        assert_eq!(bsu, vec![b'A']);
        assert_eq!(
            ops.sp.commands(),
            vec![hss::STATUS, hss::ACKSTART, hss::STATUS, hss::BSU]
        );
        assert_eq!(ops.sp.status(), 0);
    }
}
