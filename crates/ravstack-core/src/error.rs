//! Error types that callers match on through `anyhow::Error::downcast_ref`.

use std::time::Duration;

use thiserror::Error;

/// An HTTP 4xx/5xx answer from the Ravello API.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ApiError {
    pub status: u16,
    pub message: String,
}

impl ApiError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Raised by an operation to ask the retry engine for another attempt.
///
/// Unlike [`ApiError`], this is never capped by a per-status count; only
/// the overall deadline bounds it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct RetryRequested(pub String);

/// The retry deadline passed without a successful attempt.
#[derive(Debug, Clone, Error)]
#[error("Timeout retrying `{label}` ({:.2} seconds).", .elapsed.as_secs_f64())]
pub struct RetryTimeout {
    pub label: String,
    pub elapsed: Duration,
}

/// No free address left on a subnet while creating a node.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AllocationError {
    #[error("no more IPs left for interface {0}")]
    Exhausted(String),
    #[error("interface {0} has no static IP configuration")]
    NotStatic(String),
    #[error("controller node has no network connections")]
    NoConnections,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Config `[{section}]{name}` not set.{}", alternates_suffix(.alternates))]
    Missing {
        section: String,
        name: String,
        alternates: Vec<String>,
    },
    #[error("Config `[{section}]{name}` has invalid value {value:?}: expected {expected}.")]
    Invalid {
        section: String,
        name: String,
        value: String,
        expected: &'static str,
    },
    #[error("No such configuration section: {0}")]
    UnknownSection(String),
}

fn alternates_suffix(alternates: &[String]) -> String {
    if alternates.is_empty() {
        String::new()
    } else {
        format!(" Also available as {}.", alternates.join(" or "))
    }
}

/// A forced SSH command that matches none of the known virsh shapes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unrecognized command: {0}")]
pub struct UnrecognizedCommand(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_names_alternates() {
        let err = ConfigError::Missing {
            section: "ravello".to_string(),
            name: "username".to_string(),
            alternates: vec!["$RAVELLO_USERNAME".to_string(), "--username".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Config `[ravello]username` not set. Also available as $RAVELLO_USERNAME or --username."
        );
    }

    #[test]
    fn test_missing_config_without_alternates() {
        let err = ConfigError::Missing {
            section: "proxy".to_string(),
            name: "key_name".to_string(),
            alternates: vec![],
        };
        assert_eq!(err.to_string(), "Config `[proxy]key_name` not set.");
    }

    #[test]
    fn test_retry_timeout_message() {
        let err = RetryTimeout {
            label: "start node1".to_string(),
            elapsed: Duration::from_millis(1500),
        };
        assert_eq!(
            err.to_string(),
            "Timeout retrying `start node1` (1.50 seconds)."
        );
    }
}
