//! User-to-group lookup consumed by the admission pass

use std::collections::HashMap;
use std::sync::RwLock;

use crate::config::DEFAULT_GROUP;

/// Maps a peer username to its current scheduling group.
///
/// Lookups happen under the queue's internal lock, so implementations must
/// answer from local state without blocking and must be deterministic within
/// one critical section. Mappings may change between calls; the admission
/// pass always reads the current value at selection time, so a user promoted
/// or demoted after enqueueing is scheduled under their new group.
pub trait UserDirectory: Send + Sync {
    /// Current group name for `username`
    fn group_of(&self, username: &str) -> String;
}

/// In-memory directory with a fallback group.
///
/// Stands in for the server's user service in tests and single-node
/// deployments. Assignments can be changed at runtime and take effect at the
/// next admission pass.
pub struct StaticDirectory {
    fallback: String,
    assignments: RwLock<HashMap<String, String>>,
}

impl StaticDirectory {
    /// Create a directory that maps unknown users to the default group
    pub fn new() -> Self {
        Self::with_fallback(DEFAULT_GROUP)
    }

    /// Create a directory with a custom fallback group
    pub fn with_fallback(fallback: impl Into<String>) -> Self {
        Self {
            fallback: fallback.into(),
            assignments: RwLock::new(HashMap::new()),
        }
    }

    /// Assign a user to a group
    pub fn assign(&self, username: impl Into<String>, group: impl Into<String>) {
        self.assignments
            .write()
            .unwrap()
            .insert(username.into(), group.into());
    }

    /// Remove a user's assignment, reverting them to the fallback group
    pub fn unassign(&self, username: &str) {
        self.assignments.write().unwrap().remove(username);
    }
}

impl Default for StaticDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl UserDirectory for StaticDirectory {
    fn group_of(&self, username: &str) -> String {
        self.assignments
            .read()
            .unwrap()
            .get(username)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_group() {
        let directory = StaticDirectory::new();
        assert_eq!(directory.group_of("alice"), DEFAULT_GROUP);

        let directory = StaticDirectory::with_fallback("guests");
        assert_eq!(directory.group_of("alice"), "guests");
    }

    #[test]
    fn test_assignment_lifecycle() {
        let directory = StaticDirectory::new();
        directory.assign("alice", "friends");
        assert_eq!(directory.group_of("alice"), "friends");

        directory.assign("alice", "leechers");
        assert_eq!(directory.group_of("alice"), "leechers");

        directory.unassign("alice");
        assert_eq!(directory.group_of("alice"), DEFAULT_GROUP);
    }
}
