use std::io::ErrorKind;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ctlwire_frame::{Frame, FrameError, FrameReader, FrameWriter};

use crate::cmd::{install_ctrlc_handler, EchoArgs};
use crate::exit::{io_error, transport_error, CliResult, SUCCESS};
use crate::output::OutputFormat;

pub fn run(args: EchoArgs, _format: OutputFormat) -> CliResult<i32> {
    let data_port = ctlwire_transport::data_port(args.port)
        .map_err(|err| transport_error("invalid port", err))?;
    let command_listener = TcpListener::bind((args.bind.as_str(), args.port))
        .map_err(|err| io_error("command channel bind failed", err))?;
    let data_listener = TcpListener::bind((args.bind.as_str(), data_port))
        .map_err(|err| io_error("data channel bind failed", err))?;
    tracing::info!(
        bind = %args.bind,
        port = args.port,
        data_port,
        "echo controller listening"
    );

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    while running.load(Ordering::SeqCst) {
        let (command, addr) = command_listener
            .accept()
            .map_err(|err| io_error("accept failed", err))?;
        let (data, _) = data_listener
            .accept()
            .map_err(|err| io_error("data channel accept failed", err))?;
        tracing::info!(%addr, "client connected");

        match serve(command, data, &args, &running) {
            Ok(echoed) => tracing::info!(%addr, echoed, "client disconnected"),
            Err(err) => tracing::warn!(%addr, error = %err, "client session failed"),
        }
    }

    Ok(SUCCESS)
}

/// Echo every frame from one client until it hangs up. Returns the number of
/// frames echoed.
fn serve(
    command: TcpStream,
    _data: TcpStream,
    args: &EchoArgs,
    running: &AtomicBool,
) -> Result<u64, FrameError> {
    let mut reader = FrameReader::new(command.try_clone()?);
    let mut writer = FrameWriter::new(command);
    let mut echoed = 0u64;

    while running.load(Ordering::SeqCst) {
        let message = match reader.read_message() {
            Ok(message) => message,
            Err(err) if is_hangup(&err) => break,
            Err(err) => return Err(err),
        };

        tracing::info!(
            command = message.command(),
            status = message.status(),
            trailing = message.trailing.len(),
            "echoing frame"
        );
        writer.write_message(&message)?;
        echoed += 1;

        if let Some(every) = args.event_every.filter(|every| *every > 0) {
            if echoed % every == 0 {
                writer.send(&event_frame(args.event_command, echoed), &[])?;
            }
        }
    }

    Ok(echoed)
}

fn event_frame(command: u32, echoed: u64) -> Frame {
    Frame::new(command)
        .with_param(0, i32::try_from(echoed).unwrap_or(i32::MAX))
        .with_value(echoed as f64)
}

fn is_hangup(err: &FrameError) -> bool {
    match err {
        FrameError::ConnectionClosed => true,
        FrameError::Io(io) => matches!(
            io.kind(),
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe
        ),
        _ => false,
    }
}
