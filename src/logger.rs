/*!
 * Structured logging for the replica set controller
 * Every manager decision, heartbeat flip, and loader phase logs through this facade
 */

use std::fmt;
use std::sync::Mutex;
use chrono::{DateTime, Utc};
use tracing::{Level, Subscriber};
use tracing_subscriber::{
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO "),
            LogLevel::Warning => write!(f, "WARN "),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl From<Level> for LogLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::TRACE | Level::DEBUG => LogLevel::Debug,
            Level::INFO => LogLevel::Info,
            Level::WARN => LogLevel::Warning,
            Level::ERROR => LogLevel::Error,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub pid: u32,
    pub message: String,
}

impl LogEvent {
    pub fn new(level: LogLevel, message: String) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            pid: std::process::id(),
            message,
        }
    }

    pub fn format_compact(&self) -> String {
        let symbol = match self.level {
            LogLevel::Debug => "•",
            LogLevel::Info => "✓",
            LogLevel::Warning => "⚠",
            LogLevel::Error => "✗",
        };

        format!(
            "{} {} {} : replset [{}]",
            symbol,
            self.pid,
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.message
        )
    }
}

#[derive(Clone)]
pub struct ReplSetLogger {
    level: LogLevel,
}

impl ReplSetLogger {
    pub fn new(level: LogLevel) -> Self {
        Self { level }
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        if level >= self.level {
            let event = LogEvent::new(level, message.to_string());
            eprintln!("{}", event.format_compact());
        }
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn warning(&self, message: &str) {
        self.log(LogLevel::Warning, message);
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }
}

// Global logger instance, constructed once at startup.
static GLOBAL_LOGGER: Mutex<Option<ReplSetLogger>> = Mutex::new(None);

pub fn init_logger(level: LogLevel) {
    let mut global = GLOBAL_LOGGER.lock().unwrap();
    *global = Some(ReplSetLogger::new(level));
}

pub fn get_logger() -> Option<ReplSetLogger> {
    GLOBAL_LOGGER.lock().unwrap().clone()
}

#[macro_export]
macro_rules! rs_debug {
    ($($arg:tt)*) => {
        if let Some(logger) = $crate::logger::get_logger() {
            logger.debug(&format!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! rs_info {
    ($($arg:tt)*) => {
        if let Some(logger) = $crate::logger::get_logger() {
            logger.info(&format!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! rs_warn {
    ($($arg:tt)*) => {
        if let Some(logger) = $crate::logger::get_logger() {
            logger.warning(&format!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! rs_error {
    ($($arg:tt)*) => {
        if let Some(logger) = $crate::logger::get_logger() {
            logger.error(&format!($($arg)*));
        }
    };
}

pub struct ReplSetTracingLayer;

impl<S> tracing_subscriber::Layer<S> for ReplSetTracingLayer
where
    S: Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let metadata = event.metadata();
        let level = LogLevel::from(*metadata.level());

        let mut visitor = LogVisitor::default();
        event.record(&mut visitor);

        let message = visitor
            .message
            .unwrap_or_else(|| metadata.name().to_string());

        if let Some(logger) = get_logger() {
            logger.log(level, &message);
        }
    }
}

#[derive(Default)]
struct LogVisitor {
    message: Option<String>,
}

impl tracing::field::Visit for LogVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{:?}", value));
        }
    }
}

pub fn init_tracing_logger(level: LogLevel) -> Result<(), Box<dyn std::error::Error>> {
    init_logger(level);

    let filter = match level {
        LogLevel::Debug => EnvFilter::new("debug"),
        LogLevel::Info => EnvFilter::new("info"),
        LogLevel::Warning => EnvFilter::new("warn"),
        LogLevel::Error => EnvFilter::new("error"),
    };

    Registry::default()
        .with(filter)
        .with(ReplSetTracingLayer)
        .init();

    Ok(())
}
