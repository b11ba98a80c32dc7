use ipcc_frame::TERMINATOR;
use ipcc_transport::{IpccOps, PollEvents, TransportError};
use tracing::Level;

use crate::engine::Session;

/// Consecutive ready-but-empty transfers tolerated before the link is
/// treated as hung up.
pub(crate) const MAX_STALLS: u32 = 16;

/// Why a packet exchange stopped early.
pub(crate) enum LinkError {
    /// The SP asserted its interrupt line.
    Interrupted,
    Transport(TransportError),
}

impl From<TransportError> for LinkError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}

/// Outcome of waiting for one inbound packet.
pub(crate) enum Received {
    /// A terminated frame; the length excludes the terminator.
    Frame(usize),
    /// The packet buffer filled without a terminator.
    Overflow,
    /// The keep-alive limit was reached without any reply bytes.
    Silent(u32),
}

impl<O: IpccOps> Session<'_, O> {
    fn events(&self, base: PollEvents) -> PollEvents {
        if self.check_intr {
            base | PollEvents::INTR
        } else {
            base
        }
    }

    /// Writes `pkt[..len]` in full, after discarding anything stale on the link.
    pub(crate) fn send_packet(&mut self, len: usize) -> Result<(), LinkError> {
        self.ops.flush();

        let mut sent = 0;
        let mut stalls = 0;
        while sent < len {
            let ready = self.ops.poll(self.events(PollEvents::WRITE), None)?;
            if ready.contains(PollEvents::INTR) {
                return Err(LinkError::Interrupted);
            }
            let written = if ready.contains(PollEvents::WRITE) {
                self.ops.write(&self.res.pkt[sent..len])?
            } else {
                0
            };
            if written == 0 {
                stalls += 1;
                if stalls > MAX_STALLS {
                    self.ops.log(
                        Level::ERROR,
                        format_args!("transport accepted no bytes after {MAX_STALLS} polls"),
                    );
                    return Err(TransportError::Closed.into());
                }
                continue;
            }
            stalls = 0;
            sent += written;
        }
        Ok(())
    }

    /// Reads one byte at a time until a terminator arrives, probing a quiet
    /// SP with keep-alive frames.
    pub(crate) fn recv_packet(&mut self) -> Result<Received, LinkError> {
        let timeout = Some(self.config.poll_timeout);
        let mut filled = 0;
        let mut keepalives = 0;
        let mut stalls = 0;

        while filled < self.res.pkt.len() {
            let ready = self.ops.poll(self.events(PollEvents::READ), timeout)?;
            if ready.contains(PollEvents::INTR) {
                return Err(LinkError::Interrupted);
            }

            if ready.is_empty() {
                if self.config.keepalive_limit.is_some_and(|limit| keepalives >= limit) {
                    return Ok(Received::Silent(keepalives));
                }
                keepalives += 1;
                self.ops
                    .log(Level::TRACE, format_args!("no data from SP; sending keep-alive"));
                if self.ops.write(&[TERMINATOR])? == 0 {
                    self.ops
                        .log(Level::TRACE, format_args!("keep-alive not accepted by transport"));
                }
                continue;
            }

            let read = if ready.contains(PollEvents::READ) {
                self.ops.read(&mut self.res.pkt[filled..filled + 1])?
            } else {
                0
            };
            if read == 0 {
                // Readable with nothing to read is what a hung-up tty reports.
                stalls += 1;
                if stalls > MAX_STALLS {
                    self.ops.log(
                        Level::ERROR,
                        format_args!("transport ready but empty {MAX_STALLS} times; hung up"),
                    );
                    return Err(TransportError::Closed.into());
                }
                continue;
            }
            stalls = 0;
            keepalives = 0;
            if self.res.pkt[filled] == TERMINATOR {
                return Ok(Received::Frame(filled));
            }
            filled += 1;
        }

        Ok(Received::Overflow)
    }
}
