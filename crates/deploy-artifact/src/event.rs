//! Coded diagnostic events
//!
//! Lifecycle components report what they do through an [`EventLogger`]: a fire-and-forget
//! sink keyed by a [`LogEvent`] code plus positional arguments and an optional cause.
//! Events are for observability only and never steer control flow.
//!
//! Two sinks are provided:
//! - [`TracingEventLogger`] forwards each event to `tracing` with structured fields
//! - [`MemoryEventLogger`] keeps an append-only record for inspection

use parking_lot::Mutex;
use std::error::Error;
use std::fmt;

/// Severity of a coded event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Every event the kernel can log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogEvent {
    Installing,
    Installed,
    InstallFailed,
    Resolving,
    Resolved,
    ResolveFailed,
    Starting,
    Started,
    StartFailed,
    Stopping,
    Stopped,
    StopFailed,
    Uninstalling,
    Uninstalled,
    UninstallFailed,
    Refreshing,
    Refreshed,
    RefreshFailed,
    RegionImportNoMatch,
    RegionImportsParseFailed,
}

impl LogEvent {
    /// Stable event code
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Installing => "DE0000I",
            Self::Installed => "DE0001I",
            Self::InstallFailed => "DE0002E",
            Self::Resolving => "DE0003I",
            Self::Resolved => "DE0004I",
            Self::ResolveFailed => "DE0005E",
            Self::Starting => "DE0006I",
            Self::Started => "DE0007I",
            Self::StartFailed => "DE0008E",
            Self::Stopping => "DE0009I",
            Self::Stopped => "DE0010I",
            Self::StopFailed => "DE0011E",
            Self::Uninstalling => "DE0012I",
            Self::Uninstalled => "DE0013I",
            Self::UninstallFailed => "DE0014E",
            Self::Refreshing => "DE0015I",
            Self::Refreshed => "DE0016I",
            Self::RefreshFailed => "DE0017E",
            Self::RegionImportNoMatch => "OF0020W",
            Self::RegionImportsParseFailed => "OF0021E",
        }
    }

    /// Severity derived from the code suffix
    #[must_use]
    pub fn severity(self) -> Severity {
        match self.code().as_bytes().last() {
            Some(b'E') => Severity::Error,
            Some(b'W') => Severity::Warning,
            _ => Severity::Info,
        }
    }

    /// Message template; each `{}` takes the next positional argument
    #[must_use]
    pub fn template(self) -> &'static str {
        match self {
            Self::Installing => "Installing {} '{}' version '{}'.",
            Self::Installed => "Installed {} '{}' version '{}'.",
            Self::InstallFailed => "Installation of {} '{}' version '{}' failed.",
            Self::Resolving => "Resolving {} '{}' version '{}'.",
            Self::Resolved => "Resolved {} '{}' version '{}'.",
            Self::ResolveFailed => "Resolution of {} '{}' version '{}' failed.",
            Self::Starting => "Starting {} '{}' version '{}'.",
            Self::Started => "Started {} '{}' version '{}'.",
            Self::StartFailed => "Start of {} '{}' version '{}' failed.",
            Self::Stopping => "Stopping {} '{}' version '{}'.",
            Self::Stopped => "Stopped {} '{}' version '{}'.",
            Self::StopFailed => "Stop of {} '{}' version '{}' failed.",
            Self::Uninstalling => "Uninstalling {} '{}' version '{}'.",
            Self::Uninstalled => "Uninstalled {} '{}' version '{}'.",
            Self::UninstallFailed => "Uninstall of {} '{}' version '{}' failed.",
            Self::Refreshing => "Refreshing {} '{}' version '{}'.",
            Self::Refreshed => "Refreshed {} '{}' version '{}'.",
            Self::RefreshFailed => "Refresh of {} '{}' version '{}' failed.",
            Self::RegionImportNoMatch => "Region import '{}' matched no exported packages.",
            Self::RegionImportsParseFailed => "Region imports could not be parsed: '{}'.",
        }
    }

    /// Render the template with positional arguments
    ///
    /// Missing arguments render as empty; extra arguments are ignored.
    #[must_use]
    pub fn format(self, args: &[String]) -> String {
        let mut out = String::new();
        let mut args = args.iter();
        let mut pieces = self.template().split("{}").peekable();
        while let Some(piece) = pieces.next() {
            out.push_str(piece);
            if pieces.peek().is_some() {
                if let Some(arg) = args.next() {
                    out.push_str(arg);
                }
            }
        }
        out
    }
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Sink for coded events
pub trait EventLogger: Send + Sync {
    /// Record an event with an optional cause
    fn log(&self, event: LogEvent, cause: Option<&(dyn Error + 'static)>, args: &[&dyn fmt::Display]);

    /// Record an event without a cause
    fn info(&self, event: LogEvent, args: &[&dyn fmt::Display]) {
        self.log(event, None, args);
    }
}

/// One event captured by [`MemoryEventLogger`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedEvent {
    pub event: LogEvent,
    pub args: Vec<String>,
    pub cause: Option<String>,
}

impl LoggedEvent {
    /// Rendered message
    #[must_use]
    pub fn message(&self) -> String {
        self.event.format(&self.args)
    }
}

/// Append-only in-memory event record
#[derive(Debug, Default)]
pub struct MemoryEventLogger {
    inner: Mutex<Vec<LoggedEvent>>,
}

impl MemoryEventLogger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events in order
    pub fn events(&self) -> Vec<LoggedEvent> {
        self.inner.lock().clone()
    }

    /// Number of recorded occurrences of `event`
    pub fn count(&self, event: LogEvent) -> usize {
        self.inner.lock().iter().filter(|e| e.event == event).count()
    }

    /// Codes of all recorded events in order
    pub fn codes(&self) -> Vec<LogEvent> {
        self.inner.lock().iter().map(|e| e.event).collect()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

impl EventLogger for MemoryEventLogger {
    fn log(&self, event: LogEvent, cause: Option<&(dyn Error + 'static)>, args: &[&dyn fmt::Display]) {
        self.inner.lock().push(LoggedEvent {
            event,
            args: args.iter().map(ToString::to_string).collect(),
            cause: cause.map(ToString::to_string),
        });
    }
}

/// Forwards coded events to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventLogger;

impl EventLogger for TracingEventLogger {
    fn log(&self, event: LogEvent, cause: Option<&(dyn Error + 'static)>, args: &[&dyn fmt::Display]) {
        let args: Vec<String> = args.iter().map(ToString::to_string).collect();
        let message = event.format(&args);
        let cause = cause.map(ToString::to_string);
        match event.severity() {
            Severity::Info => tracing::info!(code = event.code(), cause = ?cause, "{message}"),
            Severity::Warning => tracing::warn!(code = event.code(), cause = ?cause, "{message}"),
            Severity::Error => tracing::error!(code = event.code(), cause = ?cause, "{message}"),
        }
    }
}
