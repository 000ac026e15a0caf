//! Pending upload records and per-user ordered lists

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::oneshot;

/// A pending or active transfer tracked by the queue.
///
/// Identified by `(username, filename)`. Duplicate pairs are distinct queue
/// entries; the engine treats repeat requests as retries and completes them
/// one at a time, oldest first.
#[derive(Debug)]
pub(crate) struct Upload {
    pub username: String,
    pub filename: String,
    /// Monotonic enqueue ticket; tie-breaks equal timestamps
    pub seq: u64,
    pub enqueued_at: DateTime<Utc>,
    /// Set when the transfer engine first awaits a slot
    pub ready_at: Option<DateTime<Utc>>,
    /// Ticket taken at readiness; tie-breaks equal `ready_at` stamps
    pub ready_seq: Option<u64>,
    /// Set when an admission pass grants a slot
    pub started_at: Option<DateTime<Utc>>,
    /// Group that donated the slot; the slot is returned here on completion
    pub pinned_group: Option<String>,
    /// Signalled at most once, by an admission pass
    pub start_tx: Option<oneshot::Sender<()>>,
}

impl Upload {
    /// Ready: the engine is blocked on this upload and no slot has been
    /// granted yet
    pub fn is_ready(&self) -> bool {
        self.ready_at.is_some() && self.started_at.is_none()
    }
}

/// Per-user upload lists, insertion order preserved.
///
/// Users with no remaining uploads are purged so the user set mirrors the
/// set of peers actually waiting on or holding slots.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    uploads: HashMap<String, Vec<Upload>>,
    next_seq: u64,
}

impl Registry {
    /// Next value of the shared ordering ticket. Enqueue and readiness
    /// stamps draw from the same counter, so tickets order both events
    /// exactly even when their timestamps collide.
    pub fn next_ticket(&mut self) -> u64 {
        let ticket = self.next_seq;
        self.next_seq += 1;
        ticket
    }

    /// Append a new upload to the user's list, creating the list on demand.
    /// Returns the upload's enqueue ticket.
    pub fn add(&mut self, username: &str, filename: &str) -> u64 {
        let seq = self.next_ticket();
        self.uploads
            .entry(username.to_string())
            .or_default()
            .push(Upload {
                username: username.to_string(),
                filename: filename.to_string(),
                seq,
                enqueued_at: Utc::now(),
                ready_at: None,
                ready_seq: None,
                started_at: None,
                pinned_group: None,
                start_tx: None,
            });
        seq
    }

    /// First upload matching `(username, filename)` in enqueue order
    pub fn find(&self, username: &str, filename: &str) -> Option<&Upload> {
        self.uploads
            .get(username)?
            .iter()
            .find(|upload| upload.filename == filename)
    }

    /// Mutable variant of [`find`](Self::find)
    pub fn find_mut(&mut self, username: &str, filename: &str) -> Option<&mut Upload> {
        self.uploads
            .get_mut(username)?
            .iter_mut()
            .find(|upload| upload.filename == filename)
    }

    /// Upload with the given sequence number, if still present
    pub fn get_mut(&mut self, username: &str, seq: u64) -> Option<&mut Upload> {
        self.uploads
            .get_mut(username)?
            .iter_mut()
            .find(|upload| upload.seq == seq)
    }

    /// Remove by sequence number, purging the user's entry when their list
    /// empties
    pub fn remove(&mut self, username: &str, seq: u64) -> Option<Upload> {
        let list = self.uploads.get_mut(username)?;
        let index = list.iter().position(|upload| upload.seq == seq)?;
        let upload = list.remove(index);
        if list.is_empty() {
            self.uploads.remove(username);
        }
        Some(upload)
    }

    /// Uploads for one user in enqueue order
    pub fn user_uploads(&self, username: &str) -> &[Upload] {
        self.uploads
            .get(username)
            .map(|list| list.as_slice())
            .unwrap_or(&[])
    }

    /// Users currently holding at least one upload
    pub fn users(&self) -> impl Iterator<Item = &str> {
        self.uploads.keys().map(|username| username.as_str())
    }

    /// All tracked uploads, in no particular order
    pub fn iter(&self) -> impl Iterator<Item = &Upload> {
        self.uploads.values().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_order_preserved() {
        let mut registry = Registry::default();
        registry.add("alice", "a.flac");
        registry.add("alice", "b.flac");
        registry.add("alice", "c.flac");

        let filenames: Vec<&str> = registry
            .user_uploads("alice")
            .iter()
            .map(|upload| upload.filename.as_str())
            .collect();
        assert_eq!(filenames, vec!["a.flac", "b.flac", "c.flac"]);
    }

    #[test]
    fn test_tickets_are_monotonic() {
        let mut registry = Registry::default();
        let first = registry.add("alice", "a.flac");
        let second = registry.add("bob", "b.flac");
        let third = registry.add("alice", "c.flac");
        assert!(first < second && second < third);

        // Readiness draws from the same counter as enqueue.
        assert!(registry.next_ticket() > third);
    }

    #[test]
    fn test_duplicates_are_distinct_entries() {
        let mut registry = Registry::default();
        let first = registry.add("alice", "a.flac");
        let second = registry.add("alice", "a.flac");
        assert_ne!(first, second);
        assert_eq!(registry.user_uploads("alice").len(), 2);

        // find always resolves to the oldest entry.
        assert_eq!(registry.find("alice", "a.flac").unwrap().seq, first);
        registry.remove("alice", first);
        assert_eq!(registry.find("alice", "a.flac").unwrap().seq, second);
    }

    #[test]
    fn test_remove_purges_empty_users() {
        let mut registry = Registry::default();
        let seq = registry.add("alice", "a.flac");
        assert_eq!(registry.users().count(), 1);

        let removed = registry.remove("alice", seq).unwrap();
        assert_eq!(removed.filename, "a.flac");
        assert_eq!(registry.users().count(), 0);
        assert!(registry.find("alice", "a.flac").is_none());
    }

    #[test]
    fn test_readiness_requires_unstarted() {
        let mut registry = Registry::default();
        let seq = registry.add("alice", "a.flac");

        let upload = registry.get_mut("alice", seq).unwrap();
        assert!(!upload.is_ready());
        upload.ready_at = Some(Utc::now());
        assert!(upload.is_ready());
        upload.started_at = Some(Utc::now());
        assert!(!upload.is_ready());
    }
}
