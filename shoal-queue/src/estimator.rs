//! Read-only queue position estimates.
//!
//! Estimates are computed under the queue's lock against current group
//! membership and assume uniform transfer progress. They are best-effort
//! answers to "where am I in the queue?", not release-time guarantees.

use chrono::{DateTime, Utc};

use crate::config::Strategy;
use crate::directory::UserDirectory;
use crate::errors::{QueueError, Result};
use crate::group::GroupTable;
use crate::registry::Registry;

/// True when `username`'s current group exists and has a free slot
pub(crate) fn slot_available(
    groups: &GroupTable,
    directory: &dyn UserDirectory,
    username: &str,
) -> bool {
    let group = directory.group_of(username);
    groups
        .get(&group)
        .map(|group| group.used_slots < group.slots)
        .unwrap_or(false)
}

/// Position a new upload from `username` would take: 0 when a slot is free,
/// otherwise the number of uploads tracked for users in the same group
pub(crate) fn position_for_user(
    registry: &Registry,
    groups: &GroupTable,
    directory: &dyn UserDirectory,
    username: &str,
) -> usize {
    if slot_available(groups, directory, username) {
        return 0;
    }
    let group = directory.group_of(username);
    registry
        .users()
        .filter(|user| directory.group_of(user) == group)
        .map(|user| registry.user_uploads(user).len())
        .sum()
}

/// Position of a specific enqueued upload within its group's release order
pub(crate) fn position_of(
    registry: &Registry,
    groups: &GroupTable,
    directory: &dyn UserDirectory,
    username: &str,
    filename: &str,
) -> Result<usize> {
    let target = registry
        .find(username, filename)
        .ok_or_else(|| QueueError::not_enqueued(username, filename))?;
    let group_name = directory.group_of(username);
    let strategy = groups
        .get(&group_name)
        .map(|group| group.strategy)
        .unwrap_or(Strategy::FirstInFirstOut);
    let members: Vec<&str> = registry
        .users()
        .filter(|user| directory.group_of(user) == group_name)
        .collect();

    match strategy {
        Strategy::FirstInFirstOut => {
            let mut order: Vec<(DateTime<Utc>, u64)> = members
                .iter()
                .flat_map(|user| registry.user_uploads(user))
                .map(|upload| (upload.enqueued_at, upload.seq))
                .collect();
            order.sort();
            Ok(order
                .iter()
                .position(|&(_, seq)| seq == target.seq)
                .expect("target upload missing from its own group"))
        }
        Strategy::RoundRobin => {
            let local = registry
                .user_uploads(username)
                .iter()
                .position(|upload| upload.seq == target.seq)
                .expect("target upload missing from its own user's list");
            // Under uniform progress every other user in the group advances
            // in lock-step with this one until their queue drains.
            let ahead: usize = members
                .iter()
                .filter(|user| **user != username)
                .map(|user| local.min(registry.user_uploads(user).len()))
                .sum();
            Ok(local + ahead)
        }
    }
}
