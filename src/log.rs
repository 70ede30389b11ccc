//! Logging setup with a runtime-adjustable level

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt as tracing_fmt, reload, Registry};

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Silent,
}

impl LogLevel {
    pub fn filter(self) -> LevelFilter {
        match self {
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warning => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Silent => LevelFilter::OFF,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Silent => "silent",
        };
        f.write_str(name)
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            "silent" => Ok(LogLevel::Silent),
            other => Err(Error::ConfigParse(format!("unknown log level {}", other))),
        }
    }
}

/// Current log level plus the hook to change it
pub struct LogHandle {
    level: Mutex<LogLevel>,
    reload: Option<reload::Handle<LevelFilter, Registry>>,
    tracing: AtomicBool,
}

/// Install the global subscriber. If one is already installed the returned
/// handle only records the level.
pub fn init(level: LogLevel) -> LogHandle {
    let (filter, handle) = reload::Layer::new(level.filter());
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_fmt::layer().with_target(false))
        .try_init()
        .is_ok();

    LogHandle {
        level: Mutex::new(level),
        reload: installed.then_some(handle),
        tracing: AtomicBool::new(false),
    }
}

impl LogHandle {
    pub fn detached() -> Self {
        Self {
            level: Mutex::new(LogLevel::default()),
            reload: None,
            tracing: AtomicBool::new(false),
        }
    }

    pub fn level(&self) -> LogLevel {
        *self.level.lock()
    }

    pub fn set_level(&self, level: LogLevel) {
        *self.level.lock() = level;
        if let Some(reload) = &self.reload {
            if let Err(e) = reload.modify(|filter| *filter = level.filter()) {
                warn!("[Log] can't change level: {}", e);
            }
        }
    }

    pub fn tracing(&self) -> bool {
        self.tracing.load(Ordering::Relaxed)
    }

    pub fn set_tracing(&self, enabled: bool) {
        self.tracing.store(enabled, Ordering::Relaxed);
    }
}

impl Default for LogHandle {
    fn default() -> Self {
        Self::detached()
    }
}
