use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::{IpccOps, PollEvents};

/// Default link speed between host and SP.
pub const DEFAULT_BAUD: u32 = 3_000_000;

/// Longest interval between interrupt-line samples while polling for
/// [`PollEvents::INTR`].
const INTR_SAMPLE_INTERVAL: Duration = Duration::from_millis(10);

/// Configuration for a [`SerialPort`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Path of the tty device connected to the SP.
    pub path: PathBuf,
    /// Link speed in bits per second.
    pub baud: u32,
    /// Enable RTS/CTS flow control.
    pub hardware_flow_control: bool,
    /// GPIO value file for the SP's out-of-band interrupt line, if wired.
    pub interrupt_line: Option<PathBuf>,
}

impl SerialConfig {
    /// Configuration for `path` with default speed and flow control and no
    /// interrupt line.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            baud: DEFAULT_BAUD,
            hardware_flow_control: true,
            interrupt_line: None,
        }
    }
}

/// Capability set over a Unix tty, with an optional GPIO-backed interrupt
/// line.
///
/// The descriptor is owned for the lifetime of the port, so `open` and
/// `close` are no-ops.
pub struct SerialPort {
    file: File,
    path: PathBuf,
    interrupt: Option<InterruptLine>,
}

struct InterruptLine {
    file: File,
    path: PathBuf,
}

impl SerialPort {
    /// Open and configure the device described by `config`.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let path = config.path.clone();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(&path)
            .map_err(|source| TransportError::Open {
                path: path.clone(),
                source,
            })?;

        configure_raw(&file, &path, config.baud, config.hardware_flow_control)?;

        let interrupt = match &config.interrupt_line {
            Some(line) => Some(InterruptLine::open(line)?),
            None => None,
        };

        info!(?path, baud = config.baud, "opened ipcc serial device");

        Ok(Self {
            file,
            path,
            interrupt,
        })
    }

    /// The device path this port was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "serial"
    }
}

impl IpccOps for SerialPort {
    fn flush(&mut self) {
        // SAFETY: the descriptor stays open for the lifetime of `self.file`.
        let rc = unsafe { libc::tcflush(self.file.as_raw_fd(), libc::TCIOFLUSH) };
        if rc != 0 {
            debug!(
                path = ?self.path,
                error = %std::io::Error::last_os_error(),
                "tcflush failed"
            );
        }
    }

    fn poll(&mut self, events: PollEvents, timeout: Option<Duration>) -> Result<PollEvents> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let sample_intr = events.contains(PollEvents::INTR) && self.interrupt.is_some();

        loop {
            if sample_intr && self.readintr() {
                return Ok(PollEvents::INTR);
            }

            let mut wait = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            if sample_intr {
                wait = Some(wait.map_or(INTR_SAMPLE_INTERVAL, |w| w.min(INTR_SAMPLE_INTERVAL)));
            }
            let wait_ms = wait.map_or(-1, |w| w.as_millis().min(i32::MAX as u128) as i32);

            let mut pfd = libc::pollfd {
                fd: self.file.as_raw_fd(),
                events: 0,
                revents: 0,
            };
            if events.contains(PollEvents::READ) {
                pfd.events |= libc::POLLIN;
            }
            if events.contains(PollEvents::WRITE) {
                pfd.events |= libc::POLLOUT;
            }

            // SAFETY: `pfd` is a single valid pollfd and the count passed is 1.
            let rc = unsafe { libc::poll(&mut pfd, 1, wait_ms) };
            if rc < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(err.into());
            }

            // Buffered input is still delivered after a hangup; once it is
            // drained the hangup is reported to every waiter, writers included.
            if pfd.revents & (libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0
                && pfd.revents & libc::POLLIN == 0
            {
                debug!(path = ?self.path, revents = pfd.revents, "serial device hung up");
                return Err(TransportError::Closed);
            }

            let mut ready = PollEvents::empty();
            if pfd.revents & libc::POLLIN != 0 && events.contains(PollEvents::READ) {
                ready |= PollEvents::READ;
            }
            if pfd.revents & libc::POLLOUT != 0 {
                ready |= PollEvents::WRITE;
            }
            if !ready.is_empty() {
                return Ok(ready);
            }

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Ok(PollEvents::empty());
                }
            }
        }
    }

    fn readintr(&mut self) -> bool {
        let Some(line) = self.interrupt.as_mut() else {
            return false;
        };
        match line.asserted() {
            Ok(asserted) => asserted,
            Err(err) => {
                warn!(error = %err, "interrupt line unreadable; treating as deasserted");
                false
            }
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.file.read(buf) {
            Ok(n) => Ok(n),
            Err(err)
                if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::Interrupted =>
            {
                Ok(0)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        match self.file.write(buf) {
            Ok(n) => Ok(n),
            Err(err)
                if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::Interrupted =>
            {
                Ok(0)
            }
            Err(err) if err.raw_os_error() == Some(libc::ENOBUFS) => {
                Err(TransportError::NoBufferSpace)
            }
            Err(err) => Err(err.into()),
        }
    }
}

impl std::fmt::Debug for SerialPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialPort")
            .field("path", &self.path)
            .field(
                "interrupt_line",
                &self.interrupt.as_ref().map(|line| &line.path),
            )
            .finish()
    }
}

impl InterruptLine {
    fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|source| TransportError::InterruptLine {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(?path, "using gpio interrupt line");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    fn asserted(&mut self) -> Result<bool> {
        let mut value = [0u8; 1];
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.read(&mut value))
            .map_err(|source| TransportError::InterruptLine {
                path: self.path.clone(),
                source,
            })?;
        Ok(value[0] == b'1')
    }
}

fn configure_raw(file: &File, path: &Path, baud: u32, flow_control: bool) -> Result<()> {
    let speed = baud_constant(baud)?;
    let fd = file.as_raw_fd();
    let configure_error = |source| TransportError::Configure {
        path: path.to_path_buf(),
        source,
    };

    // SAFETY: termios is plain old data; tcgetattr overwrites the zeroed value.
    let mut tio: libc::termios = unsafe { std::mem::zeroed() };

    // SAFETY: `fd` is open for the lifetime of `file` and `tio` is writable.
    if unsafe { libc::tcgetattr(fd, &mut tio) } != 0 {
        return Err(configure_error(std::io::Error::last_os_error()));
    }

    // SAFETY: `tio` is a valid termios obtained from tcgetattr.
    unsafe { libc::cfmakeraw(&mut tio) };
    tio.c_cflag |= libc::CLOCAL | libc::CREAD;
    if flow_control {
        tio.c_cflag |= libc::CRTSCTS;
    } else {
        tio.c_cflag &= !libc::CRTSCTS;
    }

    // SAFETY: `tio` is a valid termios; `speed` comes from the libc B* table.
    let rc = unsafe { libc::cfsetispeed(&mut tio, speed) | libc::cfsetospeed(&mut tio, speed) };
    if rc != 0 {
        return Err(configure_error(std::io::Error::last_os_error()));
    }

    // SAFETY: `fd` is open and `tio` is fully initialized.
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tio) } != 0 {
        return Err(configure_error(std::io::Error::last_os_error()));
    }

    Ok(())
}

fn baud_constant(baud: u32) -> Result<libc::speed_t> {
    let speed = match baud {
        9_600 => libc::B9600,
        19_200 => libc::B19200,
        38_400 => libc::B38400,
        57_600 => libc::B57600,
        115_200 => libc::B115200,
        230_400 => libc::B230400,
        #[cfg(target_os = "linux")]
        460_800 => libc::B460800,
        #[cfg(target_os = "linux")]
        921_600 => libc::B921600,
        #[cfg(target_os = "linux")]
        1_000_000 => libc::B1000000,
        #[cfg(target_os = "linux")]
        3_000_000 => libc::B3000000,
        other => return Err(TransportError::UnsupportedBaud(other)),
    };
    Ok(speed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ipcc-serial-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn open_missing_device_reports_path() {
        let config = SerialConfig::new("/nonexistent/ipcc-tty");
        let err = SerialPort::open(&config).unwrap_err();
        match err {
            TransportError::Open { path, .. } => {
                assert_eq!(path, PathBuf::from("/nonexistent/ipcc-tty"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn regular_file_is_not_a_tty() {
        let dir = temp_dir("not-tty");
        let path = dir.join("plain");
        std::fs::write(&path, b"").unwrap();

        let err = SerialPort::open(&SerialConfig::new(&path)).unwrap_err();
        assert!(matches!(err, TransportError::Configure { .. }));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unsupported_baud_rejected() {
        assert!(matches!(
            baud_constant(12_345),
            Err(TransportError::UnsupportedBaud(12_345))
        ));
        assert!(baud_constant(115_200).is_ok());
    }

    #[test]
    fn interrupt_line_follows_gpio_value() {
        let dir = temp_dir("gpio");
        let path = dir.join("value");
        std::fs::write(&path, b"0\n").unwrap();

        let mut line = InterruptLine::open(&path).unwrap();
        assert!(!line.asserted().unwrap());

        std::fs::write(&path, b"1\n").unwrap();
        assert!(line.asserted().unwrap());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_interrupt_line_rejected() {
        let err = InterruptLine::open(Path::new("/nonexistent/gpio/value"))
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::InterruptLine { .. }));
    }

    /// Opens a pseudo-terminal pair, returning the master fd and slave path.
    #[cfg(target_os = "linux")]
    fn pty_pair() -> (libc::c_int, PathBuf) {
        // SAFETY: plain libc pty setup; every return value is checked.
        unsafe {
            let master = libc::posix_openpt(libc::O_RDWR | libc::O_NOCTTY);
            assert!(master >= 0, "posix_openpt failed");
            assert_eq!(libc::grantpt(master), 0);
            assert_eq!(libc::unlockpt(master), 0);
            let mut name = [0 as libc::c_char; 128];
            assert_eq!(libc::ptsname_r(master, name.as_mut_ptr(), name.len()), 0);
            let path = std::ffi::CStr::from_ptr(name.as_ptr())
                .to_string_lossy()
                .into_owned();
            (master, PathBuf::from(path))
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn hangup_is_reported_as_closed() {
        let (master, path) = pty_pair();
        let mut config = SerialConfig::new(&path);
        config.baud = 115_200;
        config.hardware_flow_control = false;
        let mut port = SerialPort::open(&config).unwrap();

        let ready = port
            .poll(PollEvents::WRITE, Some(Duration::from_millis(100)))
            .unwrap();
        assert!(ready.contains(PollEvents::WRITE));

        // SAFETY: `master` came from posix_openpt and is closed exactly once.
        unsafe { libc::close(master) };

        let started = Instant::now();
        for events in [PollEvents::WRITE, PollEvents::READ] {
            let err = port.poll(events, None).unwrap_err();
            assert!(matches!(err, TransportError::Closed), "{events:?}: {err}");
        }
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn default_config_uses_link_speed() {
        let config = SerialConfig::new("/dev/ttyS0");
        assert_eq!(config.baud, DEFAULT_BAUD);
        assert!(config.hardware_flow_control);
        assert!(config.interrupt_line.is_none());
    }
}
