use std::fs;

use ipcc_frame::command::key_name;
use ipcc_host::{KeyLookupResult, KeySetResult};
use serde::Serialize;

use crate::cmd::link::Client;
use crate::cmd::{KeyLookupArgs, KeySetArgs};
use crate::exit::{host_error, io_error, CliResult, FAILURE, SUCCESS};
use crate::output::{bytes_preview, print_report, OutputFormat, Report};

#[derive(Serialize)]
struct LookupOutput {
    key: u8,
    name: &'static str,
    result: KeyLookupResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value_hex: Option<String>,
}

pub fn lookup(client: &mut Client, args: KeyLookupArgs, format: OutputFormat) -> CliResult<i32> {
    let mut buf = vec![0u8; args.max];
    let lookup = client
        .keylookup(args.key, &mut buf)
        .map_err(|err| host_error("keylookup", err))?;
    let value = &buf[..lookup.len];
    let found = lookup.result == KeyLookupResult::Success;

    let out = LookupOutput {
        key: args.key,
        name: key_name(args.key),
        result: lookup.result,
        value: found
            .then(|| std::str::from_utf8(value).ok().map(str::to_string))
            .flatten(),
        value_hex: found.then(|| hex::encode(value)),
    };

    let mut fields = vec![
        ("KEY", format!("{} ({})", out.key, out.name)),
        ("RESULT", format!("{:?}", out.result)),
    ];
    if found {
        fields.push(("LENGTH", value.len().to_string()));
        fields.push(("VALUE", bytes_preview(value)));
    }

    print_report(
        &Report {
            kind: "keylookup",
            record: &out,
            fields,
            raw: value.to_vec(),
        },
        format,
    );
    Ok(if found { SUCCESS } else { FAILURE })
}

#[derive(Serialize)]
struct SetOutput {
    key: u8,
    name: &'static str,
    length: usize,
    result: KeySetResult,
}

pub fn set(client: &mut Client, args: KeySetArgs, format: OutputFormat) -> CliResult<i32> {
    let data = match (&args.data, &args.file) {
        (Some(text), _) => text.as_bytes().to_vec(),
        (None, Some(path)) => fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?,
        (None, None) => Vec::new(),
    };

    let result = client
        .keyset(args.key, &data)
        .map_err(|err| host_error("keyset", err))?;
    let out = SetOutput {
        key: args.key,
        name: key_name(args.key),
        length: data.len(),
        result,
    };

    print_report(
        &Report {
            kind: "keyset",
            record: &out,
            fields: vec![
                ("KEY", format!("{} ({})", out.key, out.name)),
                ("LENGTH", out.length.to_string()),
                ("RESULT", format!("{:?}", out.result)),
            ],
            raw: format!("{:?}\n", out.result).into_bytes(),
        },
        format,
    );
    Ok(if result == KeySetResult::Success {
        SUCCESS
    } else {
        FAILURE
    })
}
