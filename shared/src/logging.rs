//! Shared logging utilities for consistent tracing across the harness

use crate::types::Component;
use chrono::{DateTime, Utc};
use tracing::{error, info};

/// Default level when none is configured
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Filter directive applied to the harness crates for the given base level
pub fn filter_directive(log_level: Option<&str>) -> String {
    let base_level = log_level.unwrap_or(DEFAULT_LOG_LEVEL);
    format!("testrig={base_level},shared={base_level}")
}

/// Initialize the stdout tracing subscriber with an optional base level.
///
/// `RUST_LOG` takes precedence when set.
pub fn init_tracing(log_level: Option<&str>) {
    use tracing_subscriber::{EnvFilter, fmt};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_directive(log_level)));

    let _ = fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}

/// Get formatted timestamp for consistent logging
pub fn format_timestamp() -> String {
    let now: DateTime<Utc> = Utc::now();
    now.format("%H:%M:%S%.3f").to_string()
}

/// Macro for component-aware info logging
#[macro_export]
macro_rules! process_info {
    ($component:expr, $($arg:tt)*) => {
        tracing::info!(
            process = %$component,
            timestamp = shared::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Macro for component-aware warning logging
#[macro_export]
macro_rules! process_warn {
    ($component:expr, $($arg:tt)*) => {
        tracing::warn!(
            process = %$component,
            timestamp = shared::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Macro for component-aware error logging
#[macro_export]
macro_rules! process_error {
    ($component:expr, $($arg:tt)*) => {
        tracing::error!(
            process = %$component,
            timestamp = shared::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Macro for component-aware debug logging
#[macro_export]
macro_rules! process_debug {
    ($component:expr, $($arg:tt)*) => {
        tracing::debug!(
            process = %$component,
            timestamp = shared::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Contextual logging helper for startup messages
pub fn log_startup(component: &Component, details: &str) {
    info!(
        process = %component,
        timestamp = format_timestamp(),
        "🚀 Starting {}",
        details
    );
}

/// Contextual logging helper for shutdown messages
pub fn log_shutdown(component: &Component, reason: &str) {
    info!(
        process = %component,
        timestamp = format_timestamp(),
        "🛑 Shutting down: {}",
        reason
    );
}

/// Contextual logging helper for error conditions
pub fn log_error(component: &Component, context: &str, error: &dyn std::fmt::Display) {
    error!(
        process = %component,
        timestamp = format_timestamp(),
        error = %error,
        "❌ {} failed: {}",
        context,
        error
    );
}

/// Contextual logging helper for success conditions
pub fn log_success(component: &Component, message: &str) {
    info!(
        process = %component,
        timestamp = format_timestamp(),
        "✅ {}",
        message
    );
}

/// Contextual logging helper for progress updates
pub fn log_progress(component: &Component, action: &str, details: &str) {
    info!(
        process = %component,
        timestamp = format_timestamp(),
        "📋 {}: {}",
        action,
        details
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directive_levels() {
        assert_eq!(filter_directive(None), "testrig=info,shared=info");
        assert_eq!(filter_directive(Some("debug")), "testrig=debug,shared=debug");
    }

    #[test]
    fn test_timestamp_format() {
        let stamp = format_timestamp();
        // HH:MM:SS.mmm
        assert_eq!(stamp.len(), 12);
        assert_eq!(&stamp[2..3], ":");
        assert_eq!(&stamp[8..9], ".");
    }

    #[test]
    fn test_init_tracing_is_repeatable() {
        init_tracing(Some("debug"));
        init_tracing(None);
        log_progress(&Component::Harness, "test", "tracing initialised twice");
    }
}
