//! Error types for upload queue operations

use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("No enqueued upload {filename} for user {username}")]
    NotEnqueued { username: String, filename: String },

    #[error("Upload {filename} for user {username} is already awaiting a slot")]
    AlreadyAwaited { username: String, filename: String },

    #[error("Upload was removed before a slot was granted")]
    Cancelled,

    #[error("Unknown transfer strategy: {0}")]
    InvalidStrategy(String),

    #[error("Group name {0} is reserved")]
    ReservedGroupName(String),

    #[error("Priority 0 is reserved for the privileged group: {0}")]
    ReservedPriority(String),
}

impl QueueError {
    /// Create a not-enqueued error for an unknown (username, filename) pair
    pub fn not_enqueued(username: impl Into<String>, filename: impl Into<String>) -> Self {
        Self::NotEnqueued {
            username: username.into(),
            filename: filename.into(),
        }
    }

    /// Create an already-awaited error for a repeated await on one upload
    pub fn already_awaited(username: impl Into<String>, filename: impl Into<String>) -> Self {
        Self::AlreadyAwaited {
            username: username.into(),
            filename: filename.into(),
        }
    }

    /// Check if this error is a configuration problem. The configurator
    /// rejects these as a unit and keeps the previous valid options.
    pub fn is_misconfiguration(&self) -> bool {
        matches!(
            self,
            QueueError::InvalidStrategy(_)
                | QueueError::ReservedGroupName(_)
                | QueueError::ReservedPriority(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = QueueError::not_enqueued("alice", "song.flac");
        assert_eq!(
            err.to_string(),
            "No enqueued upload song.flac for user alice"
        );

        let err = QueueError::already_awaited("bob", "b.iso");
        assert!(matches!(err, QueueError::AlreadyAwaited { .. }));
    }

    #[test]
    fn test_misconfiguration_classification() {
        assert!(QueueError::InvalidStrategy("weighted".to_string()).is_misconfiguration());
        assert!(QueueError::ReservedGroupName("privileged".to_string()).is_misconfiguration());
        assert!(QueueError::ReservedPriority("vip".to_string()).is_misconfiguration());
        assert!(!QueueError::not_enqueued("alice", "a.mp3").is_misconfiguration());
        assert!(!QueueError::Cancelled.is_misconfiguration());
    }
}
