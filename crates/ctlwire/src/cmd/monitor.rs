use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use ctlwire_conn::{Connection, ConnectionConfig};

use crate::cmd::send::parse_duration;
use crate::cmd::{install_ctrlc_handler, MonitorArgs};
use crate::exit::{conn_error, CliResult, FAILURE, SUCCESS};
use crate::output::{print_counters, print_message, MessageKind, OutputFormat};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub fn run(args: MonitorArgs, format: OutputFormat) -> CliResult<i32> {
    let connect_timeout = parse_duration(&args.connect_timeout)?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let conn = Connection::new(ConnectionConfig::default());
    let (tx, rx) = mpsc::channel();
    for code in &args.codes {
        let tx = tx.clone();
        conn.register_handler(*code, move |event| {
            let _ = tx.send(event.clone());
        });
    }
    drop(tx);

    conn.connect(&args.host, args.port, connect_timeout)
        .map_err(|err| conn_error("connect failed", err))?;
    tracing::info!(codes = ?args.codes, "monitoring events");

    let mut printed = 0usize;
    let mut code = SUCCESS;
    while running.load(Ordering::SeqCst) {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(event) => {
                print_message(&event, MessageKind::Event, format);
                printed = printed.saturating_add(1);
                if args.count.is_some_and(|count| printed >= count) {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if !conn.is_open() {
                    tracing::warn!("controller closed the connection");
                    code = FAILURE;
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    conn.disconnect();
    print_counters(&conn.counters(), format);
    Ok(code)
}
