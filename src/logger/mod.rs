//! Named loggers with a process-wide level and pluggable handlers.
//!
//! Every component owns one [`Logger`] static. Messages below the logger's
//! level are dropped by the default handler, which prints an RFC3339
//! timestamp and the logger name to stdout (stderr for warnings and errors).
//! [`set_log_callback`] additionally forwards records to application code.

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError, RwLock, Weak};

static GLOBAL_LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static INSTANCES: LazyLock<Mutex<Vec<Weak<LoggerInner>>>> =
    LazyLock::new(|| Mutex::new(Vec::new()));

type SharedLogHandler = Arc<dyn Fn(&Logger, LogLevel, &[LogArgument]) + Send + Sync + 'static>;

/// Receives every record at or above its threshold once installed with
/// [`set_log_callback`].
pub type LogCallback = Arc<dyn Fn(LogRecord) + Send + Sync + 'static>;

fn instances() -> MutexGuard<'static, Vec<Weak<LoggerInner>>> {
    INSTANCES.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct Logger {
    inner: Arc<LoggerInner>,
}

impl Logger {
    pub fn new(name: impl Into<String>) -> Self {
        let inner = Arc::new(LoggerInner::new(name.into()));
        instances().push(Arc::downgrade(&inner));
        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn log_level(&self) -> LogLevel {
        LogLevel::from_u8(self.inner.log_level.load(Ordering::SeqCst))
    }

    pub fn set_log_level(&self, level: impl IntoLogLevel) -> Result<(), LogError> {
        let level = level.into_log_level()?;
        self.inner.log_level.store(level as u8, Ordering::SeqCst);
        Ok(())
    }

    /// Replaces the default console handler of this logger.
    pub fn set_log_handler<F>(&self, handler: F)
    where
        F: Fn(&Logger, LogLevel, &[LogArgument]) + Send + Sync + 'static,
    {
        *self
            .inner
            .log_handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(handler);
    }

    pub fn reset_log_handler(&self) {
        *self
            .inner
            .log_handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(console_handler);
    }

    fn log_handler(&self) -> SharedLogHandler {
        self.inner
            .log_handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn callback(&self) -> Option<SharedLogHandler> {
        self.inner
            .callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_callback(&self, callback: Option<SharedLogHandler>) {
        *self
            .inner
            .callback
            .write()
            .unwrap_or_else(PoisonError::into_inner) = callback;
    }

    pub fn debug(&self, arg: impl IntoLogArgument) {
        self.dispatch(LogLevel::Debug, vec![arg.into_log_argument()]);
    }

    pub fn info(&self, arg: impl IntoLogArgument) {
        self.dispatch(LogLevel::Info, vec![arg.into_log_argument()]);
    }

    pub fn warn(&self, arg: impl IntoLogArgument) {
        self.dispatch(LogLevel::Warn, vec![arg.into_log_argument()]);
    }

    pub fn error(&self, arg: impl IntoLogArgument) {
        self.dispatch(LogLevel::Error, vec![arg.into_log_argument()]);
    }

    /// Logs several arguments as one record, e.g. a message followed by a
    /// JSON payload.
    pub fn log_with<I, T>(&self, level: LogLevel, args: I)
    where
        I: IntoIterator<Item = T>,
        T: IntoLogArgument,
    {
        let arguments = args
            .into_iter()
            .map(IntoLogArgument::into_log_argument)
            .collect();
        self.dispatch(level, arguments);
    }

    fn dispatch(&self, level: LogLevel, arguments: Vec<LogArgument>) {
        if let Some(callback) = self.callback() {
            callback(self, level, &arguments);
        }
        (self.log_handler())(self, level, &arguments);
    }
}

struct LoggerInner {
    name: String,
    log_level: AtomicU8,
    log_handler: RwLock<SharedLogHandler>,
    callback: RwLock<Option<SharedLogHandler>>,
}

impl LoggerInner {
    fn new(name: String) -> Self {
        Self {
            name,
            log_level: AtomicU8::new(GLOBAL_LOG_LEVEL.load(Ordering::SeqCst)),
            log_handler: RwLock::new(Arc::new(console_handler)),
            callback: RwLock::new(None),
        }
    }
}

fn console_handler(logger: &Logger, level: LogLevel, args: &[LogArgument]) {
    if level < logger.log_level() || level == LogLevel::Silent {
        return;
    }

    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let message = build_message(args);
    let line = if message.is_empty() {
        format!("[{now}]  {}:", logger.name())
    } else {
        format!("[{now}]  {}: {message}", logger.name())
    };

    match level {
        LogLevel::Warn | LogLevel::Error => eprintln!("{line}"),
        _ => println!("{line}"),
    }
}

fn build_message(args: &[LogArgument]) -> String {
    args.iter()
        .filter_map(LogArgument::to_message_fragment)
        .collect::<Vec<_>>()
        .join(" ")
}

fn for_each_instance(mut f: impl FnMut(Logger)) {
    let live: Vec<Arc<LoggerInner>> = {
        let mut instances = instances();
        instances.retain(|weak| weak.strong_count() > 0);
        instances.iter().filter_map(Weak::upgrade).collect()
    };
    for inner in live {
        f(Logger { inner });
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LogLevel {
    Debug = 0,
    Verbose = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Silent = 5,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Verbose => "verbose",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Silent => "silent",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => LogLevel::Debug,
            1 => LogLevel::Verbose,
            2 => LogLevel::Info,
            3 => LogLevel::Warn,
            4 => LogLevel::Error,
            _ => LogLevel::Silent,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_ascii_uppercase())
    }
}

impl FromStr for LogLevel {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "verbose" => Ok(LogLevel::Verbose),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "silent" => Ok(LogLevel::Silent),
            other => Err(LogError::InvalidLogLevel(other.to_string())),
        }
    }
}

pub trait IntoLogLevel {
    fn into_log_level(self) -> Result<LogLevel, LogError>;
}

impl IntoLogLevel for LogLevel {
    fn into_log_level(self) -> Result<LogLevel, LogError> {
        Ok(self)
    }
}

impl IntoLogLevel for &str {
    fn into_log_level(self) -> Result<LogLevel, LogError> {
        LogLevel::from_str(self)
    }
}

/// One log call as seen by a [`LogCallback`].
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub level: LogLevel,
    pub logger: String,
    pub message: String,
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogArgument {
    Text(String),
    Value(Value),
    Null,
}

impl LogArgument {
    fn to_message_fragment(&self) -> Option<String> {
        match self {
            LogArgument::Text(text) | LogArgument::Value(Value::String(text)) => Some(text.clone()),
            LogArgument::Value(Value::Null) | LogArgument::Null => None,
            LogArgument::Value(other) => Some(other.to_string()),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            LogArgument::Text(text) => Value::String(text.clone()),
            LogArgument::Value(value) => value.clone(),
            LogArgument::Null => Value::Null,
        }
    }
}

pub trait IntoLogArgument {
    fn into_log_argument(self) -> LogArgument;
}

impl IntoLogArgument for LogArgument {
    fn into_log_argument(self) -> LogArgument {
        self
    }
}

impl IntoLogArgument for String {
    fn into_log_argument(self) -> LogArgument {
        LogArgument::Text(self)
    }
}

impl IntoLogArgument for &str {
    fn into_log_argument(self) -> LogArgument {
        LogArgument::Text(self.to_owned())
    }
}

impl IntoLogArgument for Value {
    fn into_log_argument(self) -> LogArgument {
        LogArgument::Value(self)
    }
}

impl IntoLogArgument for usize {
    fn into_log_argument(self) -> LogArgument {
        LogArgument::Value(Value::from(self))
    }
}

impl<T> IntoLogArgument for Option<T>
where
    T: IntoLogArgument,
{
    fn into_log_argument(self) -> LogArgument {
        match self {
            Some(value) => value.into_log_argument(),
            None => LogArgument::Null,
        }
    }
}

#[derive(Debug, Clone)]
pub enum LogError {
    InvalidLogLevel(String),
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogError::InvalidLogLevel(level) => write!(f, "Invalid log level \"{level}\""),
        }
    }
}

impl std::error::Error for LogError {}

/// Sets the level of every existing logger and of loggers created later.
pub fn set_log_level(level: impl IntoLogLevel) -> Result<(), LogError> {
    let level = level.into_log_level()?;
    GLOBAL_LOG_LEVEL.store(level as u8, Ordering::SeqCst);
    for_each_instance(|logger| {
        logger.inner.log_level.store(level as u8, Ordering::SeqCst);
    });
    Ok(())
}

/// Installs (or with `None` removes) an application callback on every
/// existing logger. `threshold` defaults to each logger's own level.
pub fn set_log_callback(callback: Option<LogCallback>, threshold: Option<LogLevel>) {
    for_each_instance(|logger| match &callback {
        Some(callback) => {
            let callback = Arc::clone(callback);
            logger.set_callback(Some(Arc::new(
                move |instance: &Logger, level: LogLevel, args: &[LogArgument]| {
                    if level < threshold.unwrap_or_else(|| instance.log_level()) {
                        return;
                    }
                    callback(LogRecord {
                        level,
                        logger: instance.name().to_owned(),
                        message: build_message(args),
                        args: args.iter().map(LogArgument::to_value).collect(),
                    });
                },
            )));
        }
        None => logger.set_callback(None),
    });
}
