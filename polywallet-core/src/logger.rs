//! Host-pluggable logging.
//!
//! The embedding wallet installs a [`Logger`] once at startup; everything
//! the engine emits through the `log` facade is forwarded to it.

use std::sync::{Arc, OnceLock};

/// Trait representing a logger that can log messages at various levels.
///
/// Implemented by the embedding host (for a browser extension, its
/// background process) to route engine logs into its own pipeline.
///
/// # Examples
///
/// ```rust
/// use polywallet_core::{LogLevel, Logger};
///
/// struct MyLogger;
///
/// impl Logger for MyLogger {
///     fn log(&self, level: LogLevel, message: String) {
///         println!("[{:?}] {}", level, message);
///     }
/// }
///
/// polywallet_core::set_logger(std::sync::Arc::new(MyLogger));
/// ```
pub trait Logger: Sync + Send {
    /// Logs a message at the specified log level.
    fn log(&self, level: LogLevel, message: String);
}

/// Enumeration of possible log levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Designates very low priority, often extremely detailed messages.
    Trace,
    /// Designates lower priority debugging information.
    Debug,
    /// Designates informational messages that highlight the progress of the engine.
    Info,
    /// Designates potentially harmful situations.
    Warn,
    /// Designates error events that might still allow the engine to continue running.
    Error,
}

/// A logger that forwards log records to the host-provided [`Logger`].
struct HostLogger;

impl log::Log for HostLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        let is_record_from_engine = record
            .module_path()
            .is_some_and(|module_path| module_path.starts_with("polywallet"));

        let is_debug_or_trace_level =
            record.level() == log::Level::Debug || record.level() == log::Level::Trace;

        // Skip Debug and Trace chatter coming from other crates.
        if is_debug_or_trace_level && !is_record_from_engine {
            return;
        }

        if let Some(logger) = LOGGER_INSTANCE.get() {
            let level = log_level(record.level());
            let message = format!("{}", record.args());
            logger.log(level, message);
        } else {
            eprintln!("Logger not set: {}", record.args());
        }
    }

    fn flush(&self) {}
}

/// Converts a `log::Level` to a [`LogLevel`].
const fn log_level(level: log::Level) -> LogLevel {
    match level {
        log::Level::Error => LogLevel::Error,
        log::Level::Warn => LogLevel::Warn,
        log::Level::Info => LogLevel::Info,
        log::Level::Debug => LogLevel::Debug,
        log::Level::Trace => LogLevel::Trace,
    }
}

/// The host-provided logger, set once and read by [`HostLogger`].
static LOGGER_INSTANCE: OnceLock<Arc<dyn Logger>> = OnceLock::new();

/// Sets the global logger.
///
/// Call once from the host before starting the engine. If a logger was
/// already set, this prints a notice and leaves the first logger in place.
pub fn set_logger(logger: Arc<dyn Logger>) {
    match LOGGER_INSTANCE.set(logger) {
        Ok(()) => (),
        Err(_) => println!("Logger already set"),
    }

    if let Err(e) = init_logger() {
        eprintln!("Failed to set logger: {e}");
    }
}

/// Initializes the `log` facade with the forwarding logger.
///
/// # Errors
///
/// Returns a `log::SetLoggerError` if a logger was already installed.
fn init_logger() -> Result<(), log::SetLoggerError> {
    static LOGGER: HostLogger = HostLogger;
    log::set_logger(&LOGGER)?;
    log::set_max_level(log::LevelFilter::Trace);
    Ok(())
}
