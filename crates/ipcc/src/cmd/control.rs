use serde::Serialize;

use crate::cmd::link::Client;
use crate::cmd::{BootFailArgs, PanicArgs};
use crate::exit::{host_error, CliResult, SUCCESS};
use crate::output::{print_report, OutputFormat, Report};

#[derive(Serialize)]
struct Acknowledged {
    command: &'static str,
    acknowledged: bool,
}

fn report_done(command: &'static str, format: OutputFormat) {
    let out = Acknowledged {
        command,
        acknowledged: true,
    };
    print_report(
        &Report {
            kind: "control",
            record: &out,
            fields: vec![("COMMAND", command.to_string()), ("RESULT", "ok".to_string())],
            raw: Vec::new(),
        },
        format,
    );
}

pub fn ackstart(client: &mut Client, format: OutputFormat) -> CliResult<i32> {
    client
        .ackstart()
        .map_err(|err| host_error("ackstart", err))?;
    report_done("ackstart", format);
    Ok(SUCCESS)
}

pub fn bootfail(client: &mut Client, args: BootFailArgs, format: OutputFormat) -> CliResult<i32> {
    let data = args.data.unwrap_or_default();
    client
        .bootfail(args.reason, data.as_bytes())
        .map_err(|err| host_error("bootfail", err))?;
    report_done("bootfail", format);
    Ok(SUCCESS)
}

pub fn panic(client: &mut Client, args: PanicArgs, format: OutputFormat) -> CliResult<i32> {
    // SAFETY: the CLI is single-threaded and holds no other channel guard, so
    // no transaction can be interrupted by taking the channel.
    let result = unsafe { client.panic(args.message.as_bytes()) };
    result.map_err(|err| host_error("panic", err))?;
    report_done("panic", format);
    Ok(SUCCESS)
}

pub fn reboot(client: &mut Client, format: OutputFormat) -> CliResult<i32> {
    // SAFETY: as for `panic`.
    let result = unsafe { client.reboot() };
    result.map_err(|err| host_error("reboot", err))?;
    report_done("reboot", format);
    Ok(SUCCESS)
}

pub fn poweroff(client: &mut Client, format: OutputFormat) -> CliResult<i32> {
    client
        .poweroff()
        .map_err(|err| host_error("poweroff", err))?;
    report_done("poweroff", format);
    Ok(SUCCESS)
}
