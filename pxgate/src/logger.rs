//! Logger initialization for the binary.

use std::{fmt::Write, io::IsTerminal, str::FromStr};

use logforth::{append::Stderr, filter::EnvFilter, layout::Layout};

/// Single-line stderr layout: RFC 3339 UTC timestamp, level, log target,
/// message. The target stays visible so `PXGATE_LOG` filters like
/// `gateway=debug` can be written straight from the output.
#[derive(Debug)]
struct GatewayLayout {
    colored: bool,
}

impl GatewayLayout {
    fn for_stderr() -> Self {
        Self {
            colored: std::io::stderr().is_terminal(),
        }
    }
}

fn level_color(level: log::Level) -> &'static str {
    match level {
        log::Level::Error => "\x1b[31m",
        log::Level::Warn => "\x1b[33m",
        log::Level::Info => "\x1b[32m",
        log::Level::Debug => "\x1b[36m",
        log::Level::Trace => "\x1b[90m",
    }
}

impl Layout for GatewayLayout {
    fn format(
        &self,
        record: &log::Record<'_>,
        _diagnostics: &[Box<dyn logforth::diagnostic::Diagnostic>],
    ) -> anyhow::Result<Vec<u8>> {
        // Millisecond precision keeps lines greppable without the noise of
        // full nanosecond timestamps.
        let now = jiff::Timestamp::now();
        let now = now.round(jiff::Unit::Millisecond).unwrap_or(now);

        let mut line = String::with_capacity(96);

        if self.colored {
            write!(
                line,
                "{now} {}{:<5}\x1b[0m {}: {}",
                level_color(record.level()),
                record.level(),
                record.target(),
                record.args()
            )?;
        } else {
            write!(
                line,
                "{now} {:<5} {}: {}",
                record.level(),
                record.target(),
                record.args()
            )?;
        }

        Ok(line.into_bytes())
    }
}

/// Install the global logger. Called once from `main` before anything else
/// logs; an invalid filter string falls back to `info` instead of aborting
/// startup.
pub(crate) fn init(log_filter: &str) {
    let filter = EnvFilter::from_str(log_filter)
        .unwrap_or_else(|_| EnvFilter::from_str("info").expect("default filter should be valid"));

    logforth::builder()
        .dispatch(move |dispatch| {
            dispatch
                .filter(filter)
                .append(Stderr::default().with_layout(GatewayLayout::for_stderr()))
        })
        .apply();
}
