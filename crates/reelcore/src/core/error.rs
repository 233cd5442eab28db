use std::time::Duration;
use thiserror::Error;

/// Configuration could not be loaded or failed validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(Box<figment::Error>),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Load(Box::new(err))
    }
}

/// A chat transport call was rejected.
///
/// The pipeline only distinguishes the cases it reacts to; everything else
/// is carried as text for the log.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Rate limited; the call may be repeated after the given wait.
    #[error("Rate limited, retry after {}s", .0.as_secs())]
    RetryAfter(Duration),

    /// The target message no longer exists (deleted by the user, too old, ...).
    #[error("Message not found")]
    MessageGone,

    /// An edit carried the same text the message already has.
    #[error("Message is not modified")]
    NotModified,

    #[error("Transport error: {0}")]
    Other(String),
}

impl TransportError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, TransportError::RetryAfter(_))
    }
}

#[cfg(feature = "telegram")]
impl From<teloxide::RequestError> for TransportError {
    fn from(err: teloxide::RequestError) -> Self {
        if let teloxide::RequestError::RetryAfter(seconds) = &err {
            return TransportError::RetryAfter(seconds.duration());
        }

        let text = err.to_string().to_lowercase();
        if text.contains("message is not modified") {
            TransportError::NotModified
        } else if text.contains("message to edit not found")
            || text.contains("message to delete not found")
            || text.contains("message can't be edited")
            || text.contains("message can't be deleted")
        {
            TransportError::MessageGone
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_after_display() {
        let err = TransportError::RetryAfter(Duration::from_secs(7));
        assert_eq!(err.to_string(), "Rate limited, retry after 7s");
        assert!(err.is_rate_limit());
        assert!(!TransportError::MessageGone.is_rate_limit());
    }

    #[cfg(feature = "telegram")]
    #[test]
    fn test_teloxide_retry_after_maps_to_duration() {
        use teloxide::types::Seconds;

        let err: TransportError = teloxide::RequestError::RetryAfter(Seconds::from_seconds(12)).into();
        assert_eq!(err, TransportError::RetryAfter(Duration::from_secs(12)));
    }
}
