// Logging collaborator handed to each component at construction
use log::Level;
use std::fmt;
use std::sync::Arc;

/// Root log target for the discharger
pub const ROOT_TARGET: &str = "discharger";

/// Named logging handle
///
/// The service factory creates one root `Logger` and hands each component a
/// child scoped to its own target, so log filters such as
/// `RUST_LOG=discharger::rendezvous=debug` apply per component.
#[derive(Debug, Clone)]
pub struct Logger {
    target: Arc<str>,
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(ROOT_TARGET)
    }
}

impl Logger {
    #[must_use]
    pub fn new(target: &str) -> Self {
        Self {
            target: Arc::from(target),
        }
    }

    /// Logger for a sub-component, e.g. `discharger::completer`
    #[must_use]
    pub fn child(&self, name: &str) -> Self {
        Self::new(&format!("{}::{name}", self.target))
    }

    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Error, args);
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Warn, args);
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Info, args);
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Debug, args);
    }

    fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        log::log!(target: &self.target, level, "{args}");
    }
}

/// Initialize the global `env_logger` backend
///
/// `RUST_LOG` takes precedence over `level`. Calling this more than once
/// leaves the first backend in place.
pub fn init_logging(level: &str) {
    let filters = std::env::var("RUST_LOG").unwrap_or_else(|_| level.to_string());
    if env_logger::Builder::new()
        .parse_filters(&filters)
        .try_init()
        .is_err()
    {
        log::debug!("logger already initialized");
    }
}
