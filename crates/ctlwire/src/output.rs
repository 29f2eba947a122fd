use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use ctlwire_conn::ConnectionCounters;
use ctlwire_frame::Message;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
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

/// How a printed message reached us.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Response,
    Event,
}

impl MessageKind {
    fn as_str(self) -> &'static str {
        match self {
            MessageKind::Response => "response",
            MessageKind::Event => "event",
        }
    }
}

#[derive(Serialize)]
struct MessageOutput {
    kind: MessageKind,
    command: u32,
    status: u32,
    params: [i32; 7],
    value: f64,
    data: String,
    trailing_size: usize,
    timestamp: String,
}

impl MessageOutput {
    fn new(message: &Message, kind: MessageKind) -> Self {
        Self {
            kind,
            command: message.frame.command,
            status: message.frame.status,
            params: message.frame.params,
            value: message.frame.value,
            data: data_preview(message.frame.data_bytes()),
            trailing_size: message.trailing.len(),
            timestamp: now_unix_seconds(),
        }
    }
}

pub fn print_message(message: &Message, kind: MessageKind, format: OutputFormat) {
    let out = MessageOutput::new(message, kind);
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    "KIND", "COMMAND", "STATUS", "PARAMS", "VALUE", "DATA", "TRAILING",
                ])
                .add_row(vec![
                    kind.as_str().to_string(),
                    out.command.to_string(),
                    out.status.to_string(),
                    format_params(&out.params),
                    out.value.to_string(),
                    out.data.clone(),
                    out.trailing_size.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{} command={} status={} params=[{}] value={} data={:?} trailing={}",
                kind.as_str(),
                out.command,
                out.status,
                format_params(&out.params),
                out.value,
                out.data,
                out.trailing_size
            );
        }
    }
}

#[derive(Serialize)]
struct CountersOutput {
    frames_read: u64,
    frames_sent: u64,
    parse_errors: u64,
    resync_count: u64,
    bytes_discarded: u64,
    responses: u64,
    events: u64,
    unhandled: u64,
}

pub fn print_counters(counters: &ConnectionCounters, format: OutputFormat) {
    let out = CountersOutput {
        frames_read: counters.reader.frames_read,
        frames_sent: counters.frames_sent,
        parse_errors: counters.reader.parse_errors,
        resync_count: counters.reader.resync_count,
        bytes_discarded: counters.reader.bytes_discarded,
        responses: counters.dispatch.responses,
        events: counters.dispatch.events,
        unhandled: counters.dispatch.unhandled,
    };
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["COUNTER", "VALUE"]);
            for (name, value) in counter_rows(&out) {
                table.add_row(vec![name.to_string(), value.to_string()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let line: Vec<String> = counter_rows(&out)
                .into_iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect();
            println!("{}", line.join(" "));
        }
    }
}

fn counter_rows(out: &CountersOutput) -> [(&'static str, u64); 8] {
    [
        ("frames_read", out.frames_read),
        ("frames_sent", out.frames_sent),
        ("parse_errors", out.parse_errors),
        ("resync_count", out.resync_count),
        ("bytes_discarded", out.bytes_discarded),
        ("responses", out.responses),
        ("events", out.events),
        ("unhandled", out.unhandled),
    ]
}

fn format_params(params: &[i32]) -> String {
    params
        .iter()
        .map(i32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn data_preview(data: &[u8]) -> String {
    match std::str::from_utf8(data) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", data.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use ctlwire_frame::Frame;

    use super::*;

    #[test]
    fn json_output_carries_frame_fields() {
        let message = Message::new(
            Frame::new(12327)
                .with_status(2)
                .with_param(1, -4)
                .with_value(1.5)
                .with_data(b"ok"),
            vec![0u8; 3],
        );
        let out = MessageOutput::new(&message, MessageKind::Response);
        let value = serde_json::to_value(&out).expect("serializable");

        assert_eq!(value["kind"], "response");
        assert_eq!(value["command"], 12327);
        assert_eq!(value["status"], 2);
        assert_eq!(value["params"][1], -4);
        assert_eq!(value["value"], 1.5);
        assert_eq!(value["data"], "ok");
        assert_eq!(value["trailing_size"], 3);
    }

    #[test]
    fn binary_data_is_summarized() {
        assert_eq!(data_preview(&[0xff, 0xfe]), "<binary 2 bytes>");
        assert_eq!(format_params(&[1, -2, 3]), "1,-2,3");
    }
}
