//! # Tracing Module
//!
//! Environment-aware console logging using the tracing ecosystem.
//! Designed for supervised containers where logs go to stdout.
//!
//! - `RUST_LOG` wins when set; otherwise the level follows the environment name
//!   (`QUEUE_DISPATCH_ENV`, then `APP_ENV`): `production` logs at info, everything
//!   else at debug.
//! - `LOG_FORMAT=json` switches to one JSON object per line.
//! - ANSI colours are only emitted when stdout is a terminal.

use std::io::IsTerminal;
use std::sync::OnceLock;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static TRACING_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize console tracing once per process
///
/// Safe to call repeatedly, and tolerant of a global subscriber installed elsewhere
/// (tests, embedding applications).
pub fn init_tracing() {
    TRACING_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_log_level(&environment)));
        let json = std::env::var("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let layer = if json {
            fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(false)
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(std::io::stdout().is_terminal())
                .with_filter(filter)
                .boxed()
        };

        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            environment = %environment,
            json = json,
            "Tracing initialized"
        );
    });
}

/// Current environment name
fn get_environment() -> String {
    std::env::var("QUEUE_DISPATCH_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Default filter directive for an environment
fn default_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Truncate a message body for log output
///
/// Bodies are logged on every ack/reject decision; large batches are cut to
/// `limit` bytes on a char boundary and suffixed with the omitted byte count.
pub fn body_preview(body: &[u8], limit: usize) -> String {
    let text = String::from_utf8_lossy(body);
    if text.len() <= limit {
        return text.into_owned();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}… ({} more bytes)", &text[..end], text.len() - end)
}
