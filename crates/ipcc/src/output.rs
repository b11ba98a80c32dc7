use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

const SCHEMA_BASE: &str = "https://schemas.3leaps.dev/ipcc/cli/v1";

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

pub fn schema_id(kind: &str) -> String {
    format!("{SCHEMA_BASE}/{kind}.schema.json")
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    schema_id: String,
    #[serde(flatten)]
    record: &'a T,
}

/// One command result, renderable in every output format.
pub struct Report<'a, T: Serialize> {
    /// Schema name, e.g. `ident`.
    pub kind: &'static str,
    /// Serialised as-is for JSON output.
    pub record: &'a T,
    /// Rows for table and pretty output.
    pub fields: Vec<(&'static str, String)>,
    /// Bytes written verbatim for raw output.
    pub raw: Vec<u8>,
}

impl<T: Serialize> Report<'_, T> {
    pub fn to_json(&self) -> String {
        let envelope = Envelope {
            schema_id: schema_id(self.kind),
            record: self.record,
        };
        serde_json::to_string(&envelope).unwrap_or_else(|_| "{}".to_string())
    }
}

pub fn print_report<T: Serialize>(report: &Report<'_, T>, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{}", report.to_json()),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            for (name, value) in &report.fields {
                table.add_row(vec![name.to_string(), value.clone()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let width = report
                .fields
                .iter()
                .map(|(name, _)| name.len())
                .max()
                .unwrap_or(0);
            for (name, value) in &report.fields {
                println!("{name:<width$}  {value}");
            }
        }
        OutputFormat::Raw => print_raw(&report.raw),
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

/// Text if the bytes are UTF-8, a size marker otherwise.
pub fn bytes_preview(data: &[u8]) -> String {
    match std::str::from_utf8(data) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", data.len()),
    }
}
