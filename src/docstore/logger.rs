use std::sync::LazyLock;

pub use crate::logger::{set_log_level, LogLevel, Logger};

pub static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@docwire/docstore"));
