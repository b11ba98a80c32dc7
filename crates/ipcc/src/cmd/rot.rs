use std::fs;

use ipcc_host::types::IMAGE_HASH_LEN;
use serde::Serialize;

use crate::cmd::link::Client;
use crate::cmd::{ImageBlockArgs, RotArgs};
use crate::exit::{host_error, io_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_report, OutputFormat, Report};

#[derive(Serialize)]
struct RotOutput {
    request_len: usize,
    response: String,
}

pub fn rot(client: &mut Client, args: RotArgs, format: OutputFormat) -> CliResult<i32> {
    let request = match (&args.hex, &args.file) {
        (Some(text), _) => hex::decode(text.trim())
            .map_err(|err| CliError::new(USAGE, format!("--hex is not valid hex: {err}")))?,
        (None, Some(path)) => fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?,
        (None, None) => Vec::new(),
    };

    let mut buf = vec![0u8; args.max];
    let len = client
        .rot(&request, &mut buf)
        .map_err(|err| host_error("rot", err))?;
    let response = &buf[..len];

    let out = RotOutput {
        request_len: request.len(),
        response: hex::encode(response),
    };
    print_report(
        &Report {
            kind: "rot",
            record: &out,
            fields: vec![
                ("REQUEST", format!("{} bytes", out.request_len)),
                ("RESPONSE", out.response.clone()),
            ],
            raw: response.to_vec(),
        },
        format,
    );
    Ok(SUCCESS)
}

#[derive(Serialize)]
struct ImageBlockOutput {
    hash: String,
    offset: u64,
    length: usize,
    data: String,
}

fn parse_hash(text: &str) -> CliResult<[u8; IMAGE_HASH_LEN]> {
    let mut hash = [0u8; IMAGE_HASH_LEN];
    hex::decode_to_slice(text.trim(), &mut hash).map_err(|err| {
        CliError::new(
            USAGE,
            format!("--hash must be {} hex digits: {err}", IMAGE_HASH_LEN * 2),
        )
    })?;
    Ok(hash)
}

pub fn imageblock(client: &mut Client, args: ImageBlockArgs, format: OutputFormat) -> CliResult<i32> {
    let hash = parse_hash(&args.hash)?;
    let mut buf = vec![0u8; args.len];
    let len = client
        .imageblock(&hash, args.offset, &mut buf)
        .map_err(|err| host_error("imageblock", err))?;
    let block = &buf[..len];

    let out = ImageBlockOutput {
        hash: hex::encode(hash),
        offset: args.offset,
        length: len,
        data: hex::encode(block),
    };
    print_report(
        &Report {
            kind: "imageblock",
            record: &out,
            fields: vec![
                ("HASH", out.hash.clone()),
                ("OFFSET", out.offset.to_string()),
                ("LENGTH", out.length.to_string()),
            ],
            raw: block.to_vec(),
        },
        format,
    );
    Ok(SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_needs_exactly_32_bytes() {
        let text = "ab".repeat(IMAGE_HASH_LEN);
        assert_eq!(parse_hash(&text).unwrap(), [0xab; IMAGE_HASH_LEN]);

        let err = parse_hash("abcd").unwrap_err();
        assert_eq!(err.code, USAGE);
        assert!(parse_hash(&"zz".repeat(IMAGE_HASH_LEN)).is_err());
    }
}
