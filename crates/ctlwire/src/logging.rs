use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::{Directive, EnvFilter};

/// Extra filter directives, in `EnvFilter` syntax, applied after `--log-level`.
pub const LOG_ENV: &str = "CTLWIRE_LOG";

/// Targets that log once per frame on the reader thread.
const PER_FRAME_TARGETS: [&str; 2] = ["ctlwire_frame::reader", "ctlwire_conn::dispatcher"];

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// Build the subscriber filter for `level`.
///
/// Below `trace`, the per-frame targets stay at `info` so `--log-level debug`
/// shows connection lifecycle without a line per frame. `overrides` is a
/// comma-separated directive list; entries that fail to parse are returned.
pub fn build_filter(level: LogLevel, overrides: Option<&str>) -> (EnvFilter, Vec<String>) {
    let mut filter = EnvFilter::builder()
        .with_default_directive(level.as_filter().into())
        .parse_lossy("");

    if level.as_filter() < LevelFilter::TRACE {
        for target in PER_FRAME_TARGETS {
            if let Ok(directive) = format!("{target}=info").parse::<Directive>() {
                filter = filter.add_directive(directive);
            }
        }
    }

    let mut rejected = Vec::new();
    for entry in overrides
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
    {
        match entry.parse::<Directive>() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(_) => rejected.push(entry.to_string()),
        }
    }

    (filter, rejected)
}

/// Install the stderr subscriber. Thread names are kept so reader-thread
/// events can be told apart from caller events.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let overrides = std::env::var(LOG_ENV).ok();
    let (filter, rejected) = build_filter(level, overrides.as_deref());

    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(false)
        .with_thread_names(true);

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }

    for directive in rejected {
        tracing::warn!(%directive, env = LOG_ENV, "ignoring invalid log directive");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(filter: &EnvFilter) -> String {
        filter.to_string().to_lowercase()
    }

    #[test]
    fn levels_map_to_filters() {
        assert_eq!(LogLevel::Error.as_filter(), LevelFilter::ERROR);
        assert_eq!(LogLevel::Debug.as_filter(), LevelFilter::DEBUG);
        assert!(LogLevel::Trace.as_filter() > LogLevel::Warn.as_filter());
    }

    #[test]
    fn per_frame_targets_capped_below_trace() {
        let (filter, rejected) = build_filter(LogLevel::Debug, None);
        let text = rendered(&filter);
        assert!(rejected.is_empty());
        assert!(text.contains("ctlwire_frame::reader=info"), "{text}");
        assert!(text.contains("ctlwire_conn::dispatcher=info"), "{text}");
    }

    #[test]
    fn trace_level_keeps_per_frame_targets() {
        let (filter, _) = build_filter(LogLevel::Trace, None);
        assert!(!rendered(&filter).contains("ctlwire_frame::reader"));
    }

    #[test]
    fn overrides_are_applied_and_bad_entries_reported() {
        let (filter, rejected) = build_filter(
            LogLevel::Info,
            Some("ctlwire_transport=debug, ,ctlwire=loud"),
        );
        assert!(rendered(&filter).contains("ctlwire_transport=debug"));
        assert_eq!(rejected, vec!["ctlwire=loud".to_string()]);
    }
}
