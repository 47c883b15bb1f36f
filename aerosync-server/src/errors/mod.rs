use std::fmt;

use aerosync_api::Id;

mod actuator;
mod sensor;

pub use actuator::ActuatorNetError;
pub use sensor::SensorNetError;

/// Operational weight of a reported condition, ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    /// A single message or exchange was rejected; the session continues.
    Error,
    /// The process can no longer perform its function.
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        };
        write!(f, "{name}")
    }
}

/// Implemented by every domain error enum so reports carry a severity.
pub trait Reportable: fmt::Display {
    fn severity(&self) -> Severity;
}

/// Surface a recoverable condition through the log, at the level matching
/// its severity, with the device attached when known.
pub fn report(device: Option<Id>, err: &dyn Reportable) {
    match err.severity() {
        Severity::Debug => tracing::debug!(device, "{}", err),
        Severity::Info => tracing::info!(device, "{}", err),
        Severity::Warning => tracing::warn!(device, "{}", err),
        Severity::Error => tracing::error!(device, "{}", err),
        Severity::Fatal => tracing::error!(device, severity = %Severity::Fatal, "{}", err),
    }
}

/// Failures while materializing the device directory at startup.
///
/// The directory is the engine's entire view of the installation, so none
/// of these are recoverable.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("no {class} entries in the device directory")]
    EmptyClass { class: &'static str },

    #[error("invalid hardware address `{mac}`: {reason}")]
    BadAddress { mac: String, reason: &'static str },

    #[error("duplicate hardware address `{mac}` in the device directory")]
    DuplicateAddress { mac: String },
}

impl Reportable for DirectoryError {
    fn severity(&self) -> Severity {
        Severity::Fatal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering_is_ascending() {
        assert!(Severity::Debug < Severity::Info);
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
        assert!(Severity::Error < Severity::Fatal);
    }
}
