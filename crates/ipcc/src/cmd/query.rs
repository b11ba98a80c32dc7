use ipcc_frame::command::status as status_bits;
use ipcc_host::{Inventory, InventoryResult, MacAddr};
use serde::Serialize;
use tracing::warn;

use crate::cmd::link::Client;
use crate::cmd::InventoryArgs;
use crate::exit::{host_error, CliResult, SUCCESS};
use crate::output::{print_report, OutputFormat, Report};

pub fn ident(client: &mut Client, format: OutputFormat) -> CliResult<i32> {
    let ident = client.ident().map_err(|err| host_error("ident", err))?;
    let report = Report {
        kind: "ident",
        record: &ident,
        fields: vec![
            ("MODEL", ident.model.clone()),
            ("REVISION", ident.revision.to_string()),
            ("SERIAL", ident.serial.clone()),
        ],
        raw: format!("{} {} {}\n", ident.model, ident.revision, ident.serial).into_bytes(),
    };
    print_report(&report, format);
    Ok(SUCCESS)
}

#[derive(Serialize)]
struct MacsOutput {
    base: MacAddr,
    count: u16,
    stride: u8,
    addresses: Vec<MacAddr>,
}

pub fn macs(client: &mut Client, format: OutputFormat) -> CliResult<i32> {
    let block = client.macs().map_err(|err| host_error("macs", err))?;
    let out = MacsOutput {
        base: MacAddr(block.base),
        count: block.count,
        stride: block.stride,
        addresses: block.addresses().collect(),
    };

    let mut fields = vec![
        ("BASE", out.base.to_string()),
        ("COUNT", out.count.to_string()),
        ("STRIDE", out.stride.to_string()),
    ];
    if let (Some(first), Some(last)) = (out.addresses.first(), out.addresses.last()) {
        fields.push(("RANGE", format!("{first} .. {last}")));
    }
    let raw: String = out.addresses.iter().map(|mac| format!("{mac}\n")).collect();

    print_report(
        &Report {
            kind: "macs",
            record: &out,
            fields,
            raw: raw.into_bytes(),
        },
        format,
    );
    Ok(SUCCESS)
}

#[derive(Serialize)]
struct BsuOutput {
    bsu: u8,
    label: String,
}

pub fn bsu(client: &mut Client, format: OutputFormat) -> CliResult<i32> {
    let bsu = client.bsu().map_err(|err| host_error("bsu", err))?;
    let label = bsu_label(bsu);
    let out = BsuOutput {
        bsu,
        label: label.clone(),
    };
    print_report(
        &Report {
            kind: "bsu",
            record: &out,
            fields: vec![("BSU", label.clone())],
            raw: format!("{label}\n").into_bytes(),
        },
        format,
    );
    Ok(SUCCESS)
}

fn bsu_label(bsu: u8) -> String {
    if bsu.is_ascii_graphic() {
        char::from(bsu).to_string()
    } else {
        format!("{bsu:#04x}")
    }
}

#[derive(Serialize)]
struct StatusOutput {
    status: u64,
    startup: u64,
    flags: Vec<&'static str>,
}

fn status_flags(status: u64) -> Vec<&'static str> {
    let mut flags = Vec::new();
    if status & status_bits::STARTED != 0 {
        flags.push("started");
    }
    if status & status_bits::ALERT != 0 {
        flags.push("alert");
    }
    if status & !status_bits::KNOWN != 0 {
        flags.push("unknown");
    }
    flags
}

pub fn status(client: &mut Client, format: OutputFormat) -> CliResult<i32> {
    let status = client.status().map_err(|err| host_error("status", err))?;
    let out = StatusOutput {
        status: status.status,
        startup: status.startup,
        flags: status_flags(status.status),
    };
    let flags = if out.flags.is_empty() {
        "-".to_string()
    } else {
        out.flags.join(",")
    };
    print_report(
        &Report {
            kind: "status",
            record: &out,
            fields: vec![
                ("STATUS", format!("{:#x}", out.status)),
                ("STARTUP", format!("{:#x}", out.startup)),
                ("FLAGS", flags),
            ],
            raw: format!("{:#x} {:#x}\n", out.status, out.startup).into_bytes(),
        },
        format,
    );
    Ok(SUCCESS)
}

#[derive(Serialize)]
struct InventoryOutput {
    entries: Vec<Inventory>,
}

pub fn inventory(client: &mut Client, args: InventoryArgs, format: OutputFormat) -> CliResult<i32> {
    let entries = match args.index {
        Some(index) => vec![client
            .inventory(index)
            .map_err(|err| host_error("inventory", err))?],
        None => walk_inventory(
            |index| {
                client
                    .inventory(index)
                    .map_err(|err| host_error("inventory", err))
            },
            MAX_INVENTORY_ENTRIES,
        )?,
    };

    let fields = entries
        .iter()
        .map(|entry| ("ENTRY", describe_entry(entry)))
        .collect();
    let raw: String = entries
        .iter()
        .map(|entry| format!("{}\n", describe_entry(entry)))
        .collect();
    let out = InventoryOutput { entries };

    print_report(
        &Report {
            kind: "inventory",
            record: &out,
            fields,
            raw: raw.into_bytes(),
        },
        format,
    );
    Ok(SUCCESS)
}

/// Most entries a full inventory walk collects.
const MAX_INVENTORY_ENTRIES: u32 = 1024;

/// Reads entries from index 0 until the SP reports an invalid index or
/// `limit` entries have been collected.
fn walk_inventory(
    mut read: impl FnMut(u32) -> CliResult<Inventory>,
    limit: u32,
) -> CliResult<Vec<Inventory>> {
    let mut entries = Vec::new();
    for index in 0..limit {
        let entry = read(index)?;
        if entry.result == InventoryResult::InvalidIndex {
            return Ok(entries);
        }
        entries.push(entry);
    }
    warn!(limit, "inventory walk stopped before the SP reported its end");
    Ok(entries)
}

fn describe_entry(entry: &Inventory) -> String {
    let name = entry.name.as_deref().unwrap_or("-");
    match entry.result {
        InventoryResult::Success => format!(
            "{} {} type={} {} bytes",
            entry.index,
            name,
            entry.kind.unwrap_or_default(),
            entry.data.len()
        ),
        other => format!("{} {} {:?}", entry.index, name, other),
    }
}
