use std::fmt;
use std::time::Duration;

use tracing::Level;

use crate::error::Result;

bitflags::bitflags! {
    /// Readiness conditions requested from, and reported by, [`IpccOps::poll`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PollEvents: u8 {
        /// At least one byte can be read without blocking.
        const READ = 1 << 0;
        /// At least one byte can be written without blocking.
        const WRITE = 1 << 1;
        /// The SP has asserted the out-of-band interrupt line.
        const INTR = 1 << 2;
    }
}

/// The capability set a caller supplies to drive the protocol engine.
///
/// `poll`, `read` and `write` are mandatory. Everything else has a default
/// that behaves like an absent member of the set: `open`, `close` and
/// `flush` do nothing, `readintr` never observes the interrupt line, and
/// `log` forwards to `tracing` (which discards the record when no
/// subscriber is installed).
pub trait IpccOps {
    /// Acquire the underlying transport for the duration of one operation.
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release whatever [`IpccOps::open`] acquired.
    fn close(&mut self) {}

    /// Discard any bytes buffered in either direction. Best effort.
    fn flush(&mut self) {}

    /// Block until one of `events` is ready or `timeout` elapses.
    ///
    /// `None` waits indefinitely. Returns the subset of `events` that fired;
    /// an empty set means the timeout expired.
    fn poll(&mut self, events: PollEvents, timeout: Option<Duration>) -> Result<PollEvents>;

    /// Non-blocking sample of the out-of-band interrupt line.
    fn readintr(&mut self) -> bool {
        false
    }

    /// Read up to `buf.len()` bytes. Partial reads are expected.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write up to `buf.len()` bytes. Partial writes are expected.
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Diagnostic sink.
    fn log(&mut self, level: Level, args: fmt::Arguments<'_>) {
        forward_to_tracing(level, args);
    }
}

impl<T: IpccOps + ?Sized> IpccOps for &mut T {
    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn flush(&mut self) {
        (**self).flush()
    }

    fn poll(&mut self, events: PollEvents, timeout: Option<Duration>) -> Result<PollEvents> {
        (**self).poll(events, timeout)
    }

    fn readintr(&mut self) -> bool {
        (**self).readintr()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        (**self).write(buf)
    }

    fn log(&mut self, level: Level, args: fmt::Arguments<'_>) {
        (**self).log(level, args)
    }
}

/// Emit a diagnostic record through `tracing` at a runtime-selected level.
pub fn forward_to_tracing(level: Level, args: fmt::Arguments<'_>) {
    if level == Level::ERROR {
        tracing::error!("{args}");
    } else if level == Level::WARN {
        tracing::warn!("{args}");
    } else if level == Level::INFO {
        tracing::info!("{args}");
    } else if level == Level::DEBUG {
        tracing::debug!("{args}");
    } else {
        tracing::trace!("{args}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Loopback {
        data: Vec<u8>,
        logged: Vec<(Level, String)>,
    }

    impl IpccOps for Loopback {
        fn poll(&mut self, events: PollEvents, _timeout: Option<Duration>) -> Result<PollEvents> {
            let mut ready = PollEvents::WRITE;
            if !self.data.is_empty() {
                ready |= PollEvents::READ;
            }
            Ok(ready & events)
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            let n = buf.len().min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data.drain(..n);
            Ok(n)
        }

        fn write(&mut self, buf: &[u8]) -> Result<usize> {
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn log(&mut self, level: Level, args: fmt::Arguments<'_>) {
            self.logged.push((level, args.to_string()));
        }
    }

    #[test]
    fn optional_members_default_to_no_ops() {
        let mut ops = Loopback {
            data: Vec::new(),
            logged: Vec::new(),
        };
        assert!(ops.open().is_ok());
        ops.flush();
        ops.close();
        assert!(!ops.readintr());
    }

    #[test]
    fn poll_reports_only_requested_events() {
        let mut ops = Loopback {
            data: vec![1],
            logged: Vec::new(),
        };
        let ready = ops.poll(PollEvents::READ | PollEvents::INTR, None).unwrap();
        assert_eq!(ready, PollEvents::READ);
    }

    #[test]
    fn mutable_reference_forwards_every_member() {
        let mut ops = Loopback {
            data: Vec::new(),
            logged: Vec::new(),
        };
        {
            let mut by_ref = &mut ops;
            assert_eq!(by_ref.write(b"abc").unwrap(), 3);
            by_ref.log(Level::WARN, format_args!("alert {}", 7));
            let mut buf = [0u8; 2];
            assert_eq!(by_ref.read(&mut buf).unwrap(), 2);
            assert_eq!(&buf, b"ab");
        }
        assert_eq!(ops.data, b"c");
        assert_eq!(ops.logged, vec![(Level::WARN, "alert 7".to_string())]);
    }

    #[test]
    fn default_log_forwarding_does_not_require_subscriber() {
        forward_to_tracing(Level::TRACE, format_args!("discarded"));
    }
}
