#![forbid(unsafe_code)]

//! Errors surfaced by the subscription layer.

use std::fmt;

/// Errors from listener registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The registry is the detached sentinel; the owning node is not
    /// attached upstream, so nothing registered here would ever fire.
    Detached {
        /// Label of the owning node, if one was configured.
        label: Option<String>,
    },
}

impl fmt::Display for SubscriptionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Detached { label: Some(label) } => {
                write!(f, "listener registry of '{label}' is detached")
            }
            Self::Detached { label: None } => write!(f, "listener registry is detached"),
        }
    }
}

impl std::error::Error for SubscriptionError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_with_label() {
        let err = SubscriptionError::Detached {
            label: Some("sidebar".into()),
        };
        assert_eq!(err.to_string(), "listener registry of 'sidebar' is detached");
    }

    #[test]
    fn display_without_label() {
        let err = SubscriptionError::Detached { label: None };
        assert_eq!(err.to_string(), "listener registry is detached");
    }
}
