//! # Colorized Log Formatting (spec §4.11 ambient logging)
//!
//! Dicey's server and demo binary log through `tracing`; this formatter
//! colors each line by level and tags it with the emitting module, since a
//! single connection's lifecycle crosses `wire`/`transport`/`server`/
//! `client` boundaries and the module a line came from is the fastest way
//! to tell a handshake failure in `transport` apart from a protocol
//! violation surfaced in `wire` without turning on full span tracing.

use colored::*;
use std::fmt;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;

/// A custom tracing event formatter for colorizing log output based on level.
///
/// This formatter is designed to provide clean, user-facing output where the
/// whole log line is colored according to its severity level, prefixed with
/// the emitting module with the crate's own `dicey::` root stripped off.
pub struct ColorizedFormatter;

impl<S, N> FormatEvent<S, N> for ColorizedFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        // Buffer the formatted fields to apply color to the entire line.
        // This is necessary because the format_fields method writes directly.
        let mut buffer = String::new();
        let mut buf_writer = Writer::new(&mut buffer);
        ctx.format_fields(buf_writer.by_ref(), event)?;

        let level = *event.metadata().level();
        let colored_output = match level {
            Level::INFO => buffer.white(),
            Level::WARN => buffer.yellow(),
            Level::ERROR => buffer.red(),
            Level::DEBUG => buffer.blue(),
            Level::TRACE => buffer.purple(),
        };

        let target = event.metadata().target().strip_prefix("dicey::").unwrap_or(event.metadata().target());
        write!(writer, "{} ", format!("[{target}]").dimmed())?;
        writeln!(writer, "{}", colored_output)
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn strips_crate_root_from_target() {
        let target = "dicey::server::plugin";
        assert_eq!(target.strip_prefix("dicey::").unwrap_or(target), "server::plugin");
    }

    #[test]
    fn leaves_foreign_targets_untouched() {
        let target = "tokio::runtime";
        assert_eq!(target.strip_prefix("dicey::").unwrap_or(target), target);
    }
}