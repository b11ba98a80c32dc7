use std::fmt;
use std::time::Duration;

use ipcc_host::sim::{Fault, SimulatedSp};
use ipcc_host::{EngineConfig, IpccClient};
use ipcc_transport::{IpccOps, PollEvents};
use tracing::{debug, Level};

use crate::cmd::{LinkArgs, SimFault};
use crate::exit::{CliError, CliResult, USAGE};

pub type Client = IpccClient<'static, Link>;

/// The capability set behind the CLI: a real serial port or the simulator.
pub enum Link {
    #[cfg(unix)]
    Serial(ipcc_transport::SerialPort),
    Sim(Box<SimulatedSp>),
}

impl Link {
    fn inner(&mut self) -> &mut dyn IpccOps {
        match self {
            #[cfg(unix)]
            Link::Serial(port) => port,
            Link::Sim(sim) => sim.as_mut(),
        }
    }
}

impl IpccOps for Link {
    fn open(&mut self) -> ipcc_transport::Result<()> {
        self.inner().open()
    }

    fn close(&mut self) {
        self.inner().close()
    }

    fn flush(&mut self) {
        self.inner().flush()
    }

    fn poll(
        &mut self,
        events: PollEvents,
        timeout: Option<Duration>,
    ) -> ipcc_transport::Result<PollEvents> {
        self.inner().poll(events, timeout)
    }

    fn readintr(&mut self) -> bool {
        self.inner().readintr()
    }

    fn read(&mut self, buf: &mut [u8]) -> ipcc_transport::Result<usize> {
        self.inner().read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> ipcc_transport::Result<usize> {
        self.inner().write(buf)
    }

    fn log(&mut self, level: Level, args: fmt::Arguments<'_>) {
        self.inner().log(level, args)
    }
}

pub fn engine_config(args: &LinkArgs) -> CliResult<EngineConfig> {
    if args.attempts == 0 {
        return Err(CliError::new(USAGE, "--attempts must be at least 1"));
    }
    Ok(EngineConfig {
        max_attempts: args.attempts,
        poll_timeout: args.poll_timeout,
        keepalive_limit: (args.keepalive_limit > 0).then_some(args.keepalive_limit),
    })
}

pub fn open(args: &LinkArgs) -> CliResult<Client> {
    let config = engine_config(args)?;
    let link = if args.sim {
        debug!("using simulated SP");
        Link::Sim(Box::new(simulator(args)))
    } else {
        open_serial(args)?
    };
    Ok(IpccClient::new(link).with_config(config))
}

fn simulator(args: &LinkArgs) -> SimulatedSp {
    let mut sim = SimulatedSp::new().with_status(args.sim_status.unwrap_or(0));
    if let Some(fault) = args.sim_fault {
        sim.always(match fault {
            SimFault::CorruptChecksum => Fault::CorruptChecksum,
            SimFault::StaleSequence => Fault::StaleSequence,
            SimFault::DecodeFailure => Fault::DecodeFailure,
            SimFault::Silence => Fault::Silence,
            SimFault::WrongCommand => Fault::WrongCommand,
            SimFault::WrongLength => Fault::ExtraByte,
        });
    }
    sim
}

#[cfg(unix)]
fn open_serial(args: &LinkArgs) -> CliResult<Link> {
    use ipcc_transport::{SerialConfig, SerialPort};

    let Some(device) = &args.device else {
        return Err(CliError::new(
            USAGE,
            "no serial device: pass --device, set IPCC_DEVICE, or use --sim",
        ));
    };
    let mut config = SerialConfig::new(device);
    config.baud = args.baud;
    config.interrupt_line = args.intr_gpio.clone();

    debug!(path = %device.display(), baud = config.baud, "opening serial device");
    let port = SerialPort::open(&config)
        .map_err(|err| crate::exit::transport_error("open serial device", err))?;
    Ok(Link::Serial(port))
}

#[cfg(not(unix))]
fn open_serial(_args: &LinkArgs) -> CliResult<Link> {
    Err(CliError::new(
        USAGE,
        "the serial transport needs a Unix host; use --sim",
    ))
}
