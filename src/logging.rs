//! # Structured Logging Module
//!
//! Environment-aware console logging using the tracing ecosystem. Logs go to
//! stdout; ANSI colors only when stdout is a terminal; JSON lines when
//! `TASK_WATCHER_LOG_FORMAT=json`.
//!
//! The level comes from `RUST_LOG` when set, otherwise from the environment
//! (`TASK_WATCHER_ENV`): `test` and `development` log at debug, `production` at info.

use std::io::IsTerminal;
use std::sync::OnceLock;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::state_machine::TaskState;
use crate::timer::TimerEventKind;

static TRACING_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging once per process
pub fn init_structured_logging() {
    TRACING_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));
        let json_output = std::env::var("TASK_WATCHER_LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let use_ansi = IsTerminal::is_terminal(&std::io::stdout());

        let console_layer = if json_output {
            fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(use_ansi)
                .with_filter(filter)
                .boxed()
        };

        if tracing_subscriber::registry()
            .with(console_layer)
            .try_init()
            .is_err()
        {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        } else {
            tracing::info!(
                environment = %environment,
                ansi_colors = use_ansi,
                json_output = json_output,
                "Console logging initialized"
            );
        }
    });
}

fn get_environment() -> String {
    std::env::var("TASK_WATCHER_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn get_log_level(environment: &str) -> String {
    match environment {
        "test" => "debug".to_string(),
        "development" => "debug".to_string(),
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log a timer placed into a bucket
pub fn log_timer_scheduled(
    kind: TimerEventKind,
    task_id: &str,
    transaction_id: &str,
    bucket_seconds: u64,
    remaining_ms: i64,
) {
    tracing::info!(
        kind = %kind,
        task_id = %task_id,
        transaction_id = %transaction_id,
        bucket_seconds = bucket_seconds,
        remaining_ms = remaining_ms,
        "Set next schedule of {task_id} ({kind}) to {remaining_ms}ms"
    );
}

/// Log a status change the state machine refused
pub fn log_transition_rejected(
    task_id: &str,
    transaction_id: &str,
    from: TaskState,
    to: TaskState,
    source: &str,
) {
    tracing::warn!(
        task_id = %task_id,
        transaction_id = %transaction_id,
        from = %from,
        to = %to,
        source = %source,
        "Rejected transition of \"{task_id}\" from {from} to {to}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("staging"), "debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_structured_logging();
        init_structured_logging();
        log_timer_scheduled(TimerEventKind::Timeout, "t-1", "tx-1", 5, 4_000);
        log_transition_rejected("t-1", "tx-1", TaskState::Scheduled, TaskState::Completed, "test");
    }
}
