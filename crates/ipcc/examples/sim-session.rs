//! Sim session example: runs part of the catalogue against the simulated SP
//! and prints what came back.
//!
//! Run with:
//!   cargo run --example sim-session --features sim

use ipcc::frame::command::{key, status};
use ipcc::host::sim::{Fault, SimulatedSp};
use ipcc::host::{Channel, IpccClient, KeyLookupResult};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let channel = Channel::new();
    let sp = SimulatedSp::new().with_status(status::STARTED);
    let mut client = IpccClient::with_channel(sp, &channel);

    // The pending restart is acknowledged before the first reply.
    let ident = client.ident()?;
    eprintln!(
        "[host] model={} revision={} serial={}",
        ident.model, ident.revision, ident.serial
    );

    let macs = client.macs()?;
    for mac in macs.addresses() {
        eprintln!("[host] mac {mac}");
    }

    let mut buf = [0u8; 64];
    let lookup = client.keylookup(key::PING, &mut buf)?;
    if lookup.result == KeyLookupResult::Success {
        eprintln!(
            "[host] ping -> {}",
            String::from_utf8_lossy(&buf[..lookup.len])
        );
    }

    // One corrupted reply costs a resend, not the transaction.
    client.ops_mut().inject(Fault::CorruptChecksum);
    eprintln!("[host] bsu={}", char::from(client.bsu()?));

    let sp = client.into_inner();
    eprintln!(
        "[sp] {} frames received, commands {:?}",
        sp.frames_received(),
        sp.commands()
    );
    Ok(())
}
