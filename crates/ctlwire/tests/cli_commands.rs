#![cfg(feature = "cli")]

use std::io::{BufRead, BufReader};
use std::net::TcpListener;
use std::process::{Child, Command, Stdio};

/// A free command port whose data port (port + 1) is also free.
fn free_port_pair() -> u16 {
    for _ in 0..50 {
        let command = TcpListener::bind("127.0.0.1:0").expect("bind probe listener");
        let port = command.local_addr().expect("local addr").port();
        if port == u16::MAX {
            continue;
        }
        if TcpListener::bind(("127.0.0.1", port + 1)).is_ok() {
            return port;
        }
    }
    panic!("no consecutive port pair available");
}

struct EchoController {
    child: Child,
    port: u16,
}

impl EchoController {
    fn start(extra: &[&str]) -> Self {
        let port = free_port_pair();
        let mut child = Command::new(env!("CARGO_BIN_EXE_ctlwire"))
            .args(["--log-level", "info", "echo", "127.0.0.1", "--port"])
            .arg(port.to_string())
            .args(extra)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .expect("echo command should start");

        let stderr = child.stderr.take().expect("stderr should be piped");
        let mut lines = BufReader::new(stderr).lines();
        loop {
            let line = lines
                .next()
                .expect("echo exited before listening")
                .expect("stderr should be readable");
            if line.contains("echo controller listening") {
                break;
            }
        }
        // Keep draining so the child never blocks on a full pipe.
        std::thread::spawn(move || for _ in lines {});

        Self { child, port }
    }
}

impl Drop for EchoController {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn ctlwire(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_ctlwire"))
        .args(["--log-level", "error"])
        .args(args)
        .output()
        .expect("ctlwire should run")
}

#[test]
fn version_prints_name() {
    let output = ctlwire(&["version"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("ctlwire "));
}

#[test]
fn send_wait_against_echo_prints_response_json() {
    let echo = EchoController::start(&[]);
    let port = echo.port.to_string();

    let output = ctlwire(&[
        "--format", "json", "send", "127.0.0.1", "--port", &port, "--command", "12327",
        "--param", "0=1", "--param", "1=2", "--value", "3.5", "--data", "abc", "--wait",
    ]);

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    let response: serde_json::Value =
        serde_json::from_str(stdout.trim()).expect("stdout should be one json object");
    assert_eq!(response["kind"], "response");
    assert_eq!(response["command"], 12327);
    assert_eq!(response["params"][1], 2);
    assert_eq!(response["value"], 3.5);
    assert_eq!(response["data"], "abc");
}

#[test]
fn send_without_wait_prints_nothing() {
    let echo = EchoController::start(&["--event-every", "1"]);
    let port = echo.port.to_string();

    let output = ctlwire(&["send", "127.0.0.1", "--port", &port, "--command", "7"]);
    assert!(output.status.success());
    assert!(output.stdout.is_empty());
}

#[test]
fn refused_connection_returns_3() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind probe listener");
        listener.local_addr().expect("local addr").port()
    };

    let output = ctlwire(&[
        "send",
        "127.0.0.1",
        "--port",
        &port.to_string(),
        "--command",
        "1",
    ]);
    assert_eq!(output.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&output.stderr).contains("connect failed"));
}

#[test]
fn invalid_duration_returns_64() {
    let output = ctlwire(&[
        "send",
        "127.0.0.1",
        "--port",
        "5000",
        "--command",
        "1",
        "--timeout",
        "0s",
    ]);
    assert_eq!(output.status.code(), Some(64));
}
