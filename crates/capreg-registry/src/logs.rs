//! Forwarding of plugin diagnostics into the host's `tracing` output.
//!
//! Each stderr line is re-emitted under the `capreg::plugin` target with the
//! plugin identity attached. A leading level token (`ERROR`, `WARN`,
//! `INFO`, `DEBUG`, `TRACE`, optionally bracketed or followed by `:`)
//! selects the level; anything else is logged at `INFO`.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, error, info, trace, warn};

/// Stream lines from `stream` into `tracing` until EOF or until `cancel`
/// fires.
pub async fn forward_logs<R>(plugin: String, stream: R, cancel: CancellationToken)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };

        match line {
            Ok(Some(line)) => {
                let (level, message) = parse_level(&line);
                if message.is_empty() {
                    continue;
                }
                emit(&plugin, level, message);
            }
            Ok(None) => break,
            Err(e) => {
                debug!(plugin = %plugin, error = %e, "plugin log stream failed");
                break;
            }
        }
    }
    debug!(plugin = %plugin, "plugin log stream closed");
}

fn emit(plugin: &str, level: Level, message: &str) {
    match level {
        Level::ERROR => error!(target: "capreg::plugin", plugin = %plugin, "{message}"),
        Level::WARN => warn!(target: "capreg::plugin", plugin = %plugin, "{message}"),
        Level::INFO => info!(target: "capreg::plugin", plugin = %plugin, "{message}"),
        Level::DEBUG => debug!(target: "capreg::plugin", plugin = %plugin, "{message}"),
        _ => trace!(target: "capreg::plugin", plugin = %plugin, "{message}"),
    }
}

/// Split a leading level token off `line`.
pub(crate) fn parse_level(line: &str) -> (Level, &str) {
    let trimmed = line.trim();
    let (token, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((token, rest)) => (token, rest.trim_start()),
        None => (trimmed, ""),
    };

    let bare = token
        .trim_start_matches('[')
        .trim_end_matches(':')
        .trim_end_matches(']');
    let level = match bare.to_ascii_uppercase().as_str() {
        "ERROR" => Level::ERROR,
        "WARN" | "WARNING" => Level::WARN,
        "INFO" => Level::INFO,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => return (Level::INFO, trimmed),
    };
    (level, rest)
}
