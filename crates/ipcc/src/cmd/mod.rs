use clap::{Args, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod control;
pub mod key;
pub mod link;
pub mod query;
pub mod rot;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the platform identity (model, revision, serial).
    Ident,
    /// Show the MAC address block allocated to the host.
    Macs,
    /// Show the boot storage unit.
    Bsu,
    /// Show the SP status register after servicing pending events.
    Status,
    /// Acknowledge an SP restart.
    Ackstart,
    /// Look up a value in the SP key store.
    Keylookup(KeyLookupArgs),
    /// Store a value in the SP key store.
    Keyset(KeySetArgs),
    /// Read the SP hardware inventory.
    Inventory(InventoryArgs),
    /// Relay an opaque root-of-trust request.
    Rot(RotArgs),
    /// Fetch a block of a boot image held by the SP.
    Imageblock(ImageBlockArgs),
    /// Report a boot failure to the SP.
    Bootfail(BootFailArgs),
    /// Hand a panic record to the SP.
    Panic(PanicArgs),
    /// Ask the SP to reset the host.
    Reboot,
    /// Ask the SP to power the host off.
    Poweroff,
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Version(args) => version::run(args),
        command => {
            let mut client = link::open(link)?;
            dispatch(command, &mut client, format)
        }
    }
}

fn dispatch(command: Command, client: &mut link::Client, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Ident => query::ident(client, format),
        Command::Macs => query::macs(client, format),
        Command::Bsu => query::bsu(client, format),
        Command::Status => query::status(client, format),
        Command::Inventory(args) => query::inventory(client, args, format),
        Command::Keylookup(args) => key::lookup(client, args, format),
        Command::Keyset(args) => key::set(client, args, format),
        Command::Rot(args) => rot::rot(client, args, format),
        Command::Imageblock(args) => rot::imageblock(client, args, format),
        Command::Ackstart => control::ackstart(client, format),
        Command::Bootfail(args) => control::bootfail(client, args, format),
        Command::Panic(args) => control::panic(client, args, format),
        Command::Reboot => control::reboot(client, format),
        Command::Poweroff => control::poweroff(client, format),
        Command::Version(args) => version::run(args),
    }
}

/// How to reach the SP and how hard to try.
#[derive(Args, Debug, Clone)]
pub struct LinkArgs {
    /// Serial device wired to the SP.
    #[arg(long, env = "IPCC_DEVICE", value_name = "PATH", global = true)]
    pub device: Option<PathBuf>,

    /// Serial baud rate.
    #[arg(long, env = "IPCC_BAUD", default_value = "3000000", global = true)]
    pub baud: u32,

    /// GPIO value file carrying the SP interrupt line.
    #[arg(
        long = "intr-gpio",
        env = "IPCC_INTR_GPIO",
        value_name = "PATH",
        global = true
    )]
    pub intr_gpio: Option<PathBuf>,

    /// Transmissions per transaction before the link is declared unusable.
    #[arg(long, default_value = "10", global = true)]
    pub attempts: u32,

    /// Wait for reply bytes before probing with a keep-alive (e.g. 100ms, 1s).
    #[arg(long, default_value = "100ms", value_parser = parse_duration, global = true)]
    pub poll_timeout: Duration,

    /// Keep-alives per reply before resending; 0 waits forever.
    #[arg(long, default_value = "50", global = true)]
    pub keepalive_limit: u32,

    /// Talk to a built-in simulated SP instead of a serial device.
    #[arg(long, global = true)]
    pub sim: bool,

    /// Make the simulated SP misbehave on every reply.
    #[arg(long, value_name = "FAULT", global = true, hide = true)]
    pub sim_fault: Option<SimFault>,

    /// Initial status register of the simulated SP.
    #[arg(long, value_name = "BITS", global = true, hide = true)]
    pub sim_status: Option<u64>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum SimFault {
    CorruptChecksum,
    StaleSequence,
    DecodeFailure,
    Silence,
    WrongCommand,
    WrongLength,
}

#[derive(Args, Debug)]
pub struct KeyLookupArgs {
    /// Key to look up (0 = ping).
    #[arg(long)]
    pub key: u8,
    /// Largest value to accept, in bytes.
    #[arg(long, default_value = "4096")]
    pub max: usize,
}

#[derive(Args, Debug)]
pub struct KeySetArgs {
    /// Key to store.
    #[arg(long)]
    pub key: u8,
    /// Value as a string.
    #[arg(long, conflicts_with = "file", required_unless_present = "file")]
    pub data: Option<String>,
    /// Read the value from a file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct InventoryArgs {
    /// Entry to read. Without it every entry is listed.
    #[arg(long)]
    pub index: Option<u32>,
}

#[derive(Args, Debug)]
pub struct RotArgs {
    /// Request as hex.
    #[arg(long, conflicts_with = "file", required_unless_present = "file")]
    pub hex: Option<String>,
    /// Read the request from a file.
    #[arg(long, conflicts_with = "hex")]
    pub file: Option<PathBuf>,
    /// Largest reply to accept, in bytes.
    #[arg(long, default_value = "4096")]
    pub max: usize,
}

#[derive(Args, Debug)]
pub struct ImageBlockArgs {
    /// SHA-256 of the image, as 64 hex digits.
    #[arg(long)]
    pub hash: String,
    /// Byte offset into the image.
    #[arg(long, default_value = "0")]
    pub offset: u64,
    /// Largest block to accept, in bytes.
    #[arg(long, default_value = "4096")]
    pub len: usize,
}

#[derive(Args, Debug)]
pub struct BootFailArgs {
    /// Failure reason code.
    #[arg(long)]
    pub reason: u8,
    /// Free-form detail.
    #[arg(long)]
    pub data: Option<String>,
}

#[derive(Args, Debug)]
pub struct PanicArgs {
    /// Panic message.
    #[arg(long, default_value = "")]
    pub message: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parses `150ms`, `2s` or a bare number of seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("duration must not be empty".to_string());
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| format!("invalid duration: {input}"))?;
    if value == 0 {
        return Err("duration must be greater than zero".to_string());
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
