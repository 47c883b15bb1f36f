use aerosync_api::{ActuatorResource, ValidationError};

use crate::errors::{Reportable, Severity};

/// Failure kinds on the actuator observation path. All are local to one
/// notification or one observe relationship; the watchdog re-establishes
/// whatever was lost.
#[derive(Debug, thiserror::Error)]
pub enum ActuatorNetError {
    #[error("observe payload is not a JSON object: {raw}")]
    NotJson { raw: String },

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    /// The device shed this observer; it keeps serving its other clients.
    #[error("{resource} has too many observers; not synchronized until the device restarts")]
    TooManyObservers { resource: ActuatorResource },

    #[error("observe on {resource} rejected with {code}")]
    ObserveRejected {
        resource: ActuatorResource,
        code: String,
    },

    #[error("observe on {resource} got no usable response: {reason}")]
    ObserveFailed {
        resource: ActuatorResource,
        reason: String,
    },
}

impl Reportable for ActuatorNetError {
    fn severity(&self) -> Severity {
        match self {
            Self::TooManyObservers { .. } => Severity::Warning,
            _ => Severity::Error,
        }
    }
}
