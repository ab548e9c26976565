use std::path::PathBuf;

use thiserror::Error;

use crate::config::Role;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Failed to load configuration from {}: {reason}", path.display())]
    ConfigLoad { path: PathBuf, reason: String },

    #[error("Unknown environment: {0}")]
    UnknownEnvironment(String),

    #[error("Environment '{name}' is not a valid {role}: missing {}", missing.join(", "))]
    InvalidEnvironment {
        name: String,
        role: Role,
        missing: Vec<&'static str>,
    },

    #[error("Unknown shortcut: {0}")]
    UnknownShortcut(String),

    #[error("SSH tunnel failed: {0}")]
    Tunnel(String),

    #[error("Schema inspection failed: {0}")]
    Inspection(String),

    #[error("External command '{stage}' failed ({status}): {stderr}")]
    ExternalCommand {
        stage: String,
        status: String,
        stderr: String,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_environment_lists_every_missing_field() {
        let err = AppError::InvalidEnvironment {
            name: "production".to_string(),
            role: Role::Source,
            missing: vec!["username", "password", "host"],
        };
        assert_eq!(
            err.to_string(),
            "Environment 'production' is not a valid source: missing username, password, host"
        );
    }
}
