use std::fs;
use std::time::Duration;

use ctlwire_conn::{Connection, ConnectionConfig, Request};
use ctlwire_frame::PARAM_COUNT;

use crate::cmd::SendArgs;
use crate::exit::{conn_error, io_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_message, MessageKind, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let connect_timeout = parse_duration(&args.connect_timeout)?;
    let request = build_request(&args)?;

    let conn = Connection::new(ConnectionConfig {
        default_response_timeout: timeout,
        ..ConnectionConfig::default()
    });
    conn.connect(&args.host, args.port, connect_timeout)
        .map_err(|err| conn_error("connect failed", err))?;

    if args.wait {
        let response = conn
            .query(&request, timeout)
            .map_err(|err| conn_error("query failed", err))?;
        print_message(&response, MessageKind::Response, format);
    } else {
        conn.notify(&request)
            .map_err(|err| conn_error("send failed", err))?;
    }

    conn.disconnect();
    Ok(SUCCESS)
}

fn build_request(args: &SendArgs) -> CliResult<Request> {
    let mut request = Request::new(args.command);
    for (index, value) in &args.params {
        request = request.param(*index, *value);
    }
    if let Some(value) = args.value {
        request = request.value(value);
    }
    if let Some(data) = &args.data {
        if data.len() > ctlwire_frame::DATA_SIZE {
            return Err(CliError::new(
                USAGE,
                format!(
                    "--data is {} bytes; the inline field holds {} (use --trailing-file)",
                    data.len(),
                    ctlwire_frame::DATA_SIZE
                ),
            ));
        }
        request = request.data(data.as_bytes());
    }
    if let Some(path) = &args.trailing_file {
        let trailing = fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
        request = request.trailing(trailing);
    }
    Ok(request)
}

/// Parse `INDEX=VALUE` for `--param`.
pub fn parse_param(input: &str) -> Result<(usize, i32), String> {
    let (index, value) = input
        .split_once('=')
        .ok_or_else(|| format!("expected INDEX=VALUE, got {input:?}"))?;
    let index: usize = index
        .trim()
        .parse()
        .map_err(|_| format!("invalid parameter index: {index:?}"))?;
    if index >= PARAM_COUNT {
        return Err(format!(
            "parameter index {index} out of range (0-{})",
            PARAM_COUNT - 1
        ));
    }
    let value: i32 = value
        .trim()
        .parse()
        .map_err(|_| format!("invalid parameter value: {value:?}"))?;
    Ok((index, value))
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> SendArgs {
        SendArgs {
            host: "127.0.0.1".to_string(),
            port: 5000,
            command: 12327,
            params: vec![(0, 1), (6, -7)],
            value: Some(2.5),
            data: Some("abc".to_string()),
            trailing_file: None,
            wait: true,
            timeout: "5s".to_string(),
            connect_timeout: "3s".to_string(),
        }
    }

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
        assert_eq!(
            parse_duration("18446744073709551615s").unwrap(),
            Duration::from_secs(u64::MAX)
        );
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert_eq!(parse_duration("").unwrap_err().code, USAGE);
    }

    #[test]
    fn parse_param_accepts_index_value_pairs() {
        assert_eq!(parse_param("0=1"), Ok((0, 1)));
        assert_eq!(parse_param("6=-42"), Ok((6, -42)));
        assert!(parse_param("7=1").is_err());
        assert!(parse_param("1").is_err());
        assert!(parse_param("x=1").is_err());
    }

    #[test]
    fn build_request_fills_fields() {
        let request = build_request(&args()).expect("request should build");
        let frame = request.frame();
        assert_eq!(frame.command, 12327);
        assert_eq!(frame.params, [1, 0, 0, 0, 0, 0, -7]);
        assert_eq!(frame.value, 2.5);
        assert_eq!(frame.data_bytes(), b"abc");
        assert!(request.trailing_payload().is_empty());
    }

    #[test]
    fn oversized_inline_data_is_usage_error() {
        let mut args = args();
        args.data = Some("x".repeat(ctlwire_frame::DATA_SIZE + 1));
        assert_eq!(build_request(&args).unwrap_err().code, USAGE);
    }
}
