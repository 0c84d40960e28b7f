//! Error types shared across the workspace.

use std::path::PathBuf;

use thiserror::Error;

use crate::LoopId;

pub type ControlResult<T> = Result<T, ControlError>;

/// Synchronous failures returned to the caller of a construction or API call.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("a {kind} with ID {id} already exists")]
    DuplicateIdentifier { kind: &'static str, id: String },

    #[error("{endpoint} {id} is already bound to {bound_to}")]
    DuplicateBinding {
        endpoint: &'static str,
        id: String,
        bound_to: LoopId,
    },

    #[error("the listener is already subscribed to sensor {sensor}")]
    DuplicateListener { sensor: String },

    #[error("the listener is not subscribed to sensor {sensor}")]
    UnknownListener { sensor: String },

    #[error("period of {owner} must be greater than zero")]
    InvalidPeriod { owner: String },

    #[error("timer {name} was stopped and cannot be started again")]
    TimerStopped { name: String },

    #[error("unknown {kind} {id}")]
    UnknownComponent { kind: &'static str, id: String },

    #[error("failed to spawn worker thread for {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Failure raised by an external collaborator: a sampling strategy, a
/// control behaviour, an actuator or a sensor listener.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ComponentError {
    message: String,
}

impl ComponentError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {what}")]
    Invalid { what: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_binding_names_the_owner() {
        let err = ControlError::DuplicateBinding {
            endpoint: "sensor",
            id: "s1".into(),
            bound_to: LoopId(1),
        };
        assert_eq!(err.to_string(), "sensor s1 is already bound to ControlLoop1");
    }

    #[test]
    fn config_errors_convert_transparently() {
        let err: ControlError = ConfigError::Invalid {
            what: "no sensors".into(),
        }
        .into();
        assert_eq!(err.to_string(), "invalid configuration: no sensors");
    }
}
