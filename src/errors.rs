use std::path::PathBuf;
use thiserror::Error;

/// The central error type for botkeeper.
///
/// Every subsystem error converts into this type so the binary can map any
/// failure to an exit code in one place.
#[derive(Error, Debug)]
pub enum BotkeeperError {
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Recovery error: {0}")]
    Recovery(#[from] RecoveryError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors raised while routing or executing a command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Unknown command type: {0}")]
    UnknownCommand(String),

    #[error("Missing required parameter '{0}'")]
    MissingParameter(String),

    #[error("Invalid value for parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Agent {0} not found")]
    AgentNotFound(String),

    #[error("Swarm {0} not found")]
    SwarmNotFound(String),

    #[error("Unknown swarm template: {0}")]
    UnknownTemplate(String),

    #[error("No suitable agent found for command {0}")]
    NoSuitableAgent(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Command queue for agent {0} is closed")]
    QueueClosed(String),

    #[error("Command '{command}' is not supported: {reason}")]
    Unsupported { command: String, reason: String },

    #[error("Handler failed: {0}")]
    Handler(String),

    #[error("Handler panicked: {0}")]
    HandlerPanicked(String),
}

/// Errors raised by recovery actions and their scheduler.
#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Unknown recovery action: {0}")]
    UnknownAction(String),

    #[error("Recovery action '{0}' is already registered")]
    DuplicateAction(String),

    #[error("Recovery action '{action}' failed: {message}")]
    ExecutorFailed { action: String, message: String },

    #[error("Recovery action '{action}' panicked: {message}")]
    ExecutorPanicked { action: String, message: String },

    #[error("Filesystem error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by a metrics provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetricsError {
    #[error("Metrics provider unavailable: {0}")]
    Unavailable(String),

    #[error("Sampling failed: {0}")]
    Sampling(String),
}

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

pub type Result<T> = std::result::Result<T, BotkeeperError>;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_ERROR: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_DISPATCH_ERROR: u8 = 3;
pub const EXIT_RECOVERY_ERROR: u8 = 4;

/// Determine the appropriate process exit code for an error.
pub fn get_exit_code(e: &anyhow::Error) -> u8 {
    if let Some(err) = e.downcast_ref::<BotkeeperError>() {
        return match err {
            BotkeeperError::Config(_) => EXIT_CONFIG_ERROR,
            BotkeeperError::Dispatch(_) => EXIT_DISPATCH_ERROR,
            BotkeeperError::Recovery(_) => EXIT_RECOVERY_ERROR,
            _ => EXIT_ERROR,
        };
    }

    // Direct enum unwraps fallback
    if e.downcast_ref::<ConfigError>().is_some() {
        return EXIT_CONFIG_ERROR;
    }
    if e.downcast_ref::<DispatchError>().is_some() {
        return EXIT_DISPATCH_ERROR;
    }
    if e.downcast_ref::<RecoveryError>().is_some() {
        return EXIT_RECOVERY_ERROR;
    }

    // Errors that only reached us through a context chain
    for cause in e.chain() {
        if cause.downcast_ref::<ConfigError>().is_some() {
            return EXIT_CONFIG_ERROR;
        }
    }

    EXIT_ERROR
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_error_messages() {
        assert_eq!(
            DispatchError::UnknownCommand("fly".into()).to_string(),
            "Unknown command type: fly"
        );
        assert_eq!(
            DispatchError::NoSuitableAgent("generate_code".into()).to_string(),
            "No suitable agent found for command generate_code"
        );
        assert_eq!(
            DispatchError::InvalidStateTransition {
                from: "stopping".into(),
                to: "starting".into()
            }
            .to_string(),
            "Invalid state transition from stopping to starting"
        );
    }

    #[test]
    fn test_botkeeper_error_from_dispatch() {
        let err: BotkeeperError = DispatchError::AgentNotFound("a1".into()).into();
        assert!(matches!(err, BotkeeperError::Dispatch(_)));
        assert!(err.to_string().contains("Agent a1 not found"));
    }

    #[test]
    fn test_exit_code_config_error() {
        let err: anyhow::Error = BotkeeperError::Config(ConfigError::Invalid {
            field: "monitor.interval_secs".into(),
            reason: "must be greater than zero".into(),
        })
        .into();
        assert_eq!(get_exit_code(&err), EXIT_CONFIG_ERROR);
    }

    #[test]
    fn test_exit_code_direct_enums() {
        let dispatch: anyhow::Error = DispatchError::SwarmNotFound("s".into()).into();
        assert_eq!(get_exit_code(&dispatch), EXIT_DISPATCH_ERROR);

        let recovery: anyhow::Error = RecoveryError::UnknownAction("x".into()).into();
        assert_eq!(get_exit_code(&recovery), EXIT_RECOVERY_ERROR);
    }

    #[test]
    fn test_exit_code_config_in_context_chain() {
        let err = anyhow::Error::new(ConfigError::Invalid {
            field: "server.bind".into(),
            reason: "bad".into(),
        })
        .context("loading configuration");
        assert_eq!(get_exit_code(&err), EXIT_CONFIG_ERROR);
    }

    #[test]
    fn test_exit_code_generic() {
        let err = anyhow::anyhow!("something else");
        assert_eq!(get_exit_code(&err), EXIT_ERROR);
        assert_eq!(EXIT_SUCCESS, 0);
    }
}
