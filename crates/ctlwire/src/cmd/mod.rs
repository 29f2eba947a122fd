use clap::{Args, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::exit::{CliError, CliResult, INTERNAL};
use crate::output::OutputFormat;

pub mod echo;
pub mod monitor;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send one command frame, optionally waiting for its response.
    Send(SendArgs),
    /// Print unsolicited event frames for the given command codes.
    Monitor(MonitorArgs),
    /// Run a loopback controller that echoes every frame back.
    Echo(EchoArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Send(args) => send::run(args, format),
        Command::Monitor(args) => monitor::run(args, format),
        Command::Echo(args) => echo::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Clear `running` on Ctrl-C.
pub(crate) fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Controller host name or address.
    pub host: String,
    /// Command channel port; the data channel is port + 1.
    #[arg(long, short = 'p', env = "CTLWIRE_PORT")]
    pub port: u16,
    /// Command code.
    #[arg(long, short = 'c')]
    pub command: u32,
    /// Parameter as INDEX=VALUE (index 0-6). Repeatable.
    #[arg(long = "param", value_name = "INDEX=VALUE", value_parser = send::parse_param)]
    pub params: Vec<(usize, i32)>,
    /// Floating point value field.
    #[arg(long, allow_negative_numbers = true)]
    pub value: Option<f64>,
    /// Inline data (up to 72 bytes).
    #[arg(long)]
    pub data: Option<String>,
    /// File sent as the trailing payload.
    #[arg(long, value_name = "PATH")]
    pub trailing_file: Option<PathBuf>,
    /// Wait for the response and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for the response (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// Connection timeout (e.g. 3s, 500ms).
    #[arg(long, default_value = "3s")]
    pub connect_timeout: String,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Controller host name or address.
    pub host: String,
    /// Command channel port; the data channel is port + 1.
    #[arg(long, short = 'p', env = "CTLWIRE_PORT")]
    pub port: u16,
    /// Event command codes to print (comma-separated).
    #[arg(long, value_delimiter = ',', required = true)]
    pub codes: Vec<u32>,
    /// Exit after receiving N events.
    #[arg(long)]
    pub count: Option<usize>,
    /// Connection timeout (e.g. 3s, 500ms).
    #[arg(long, default_value = "3s")]
    pub connect_timeout: String,
}

#[derive(Args, Debug)]
pub struct EchoArgs {
    /// Address to bind.
    #[arg(default_value = "127.0.0.1")]
    pub bind: String,
    /// Command channel port; the data channel listens on port + 1.
    #[arg(long, short = 'p', env = "CTLWIRE_PORT")]
    pub port: u16,
    /// Also emit an event frame after every N echoed frames.
    #[arg(long, value_name = "N")]
    pub event_every: Option<u64>,
    /// Command code used for emitted event frames.
    #[arg(long, default_value = "9000")]
    pub event_command: u32,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
