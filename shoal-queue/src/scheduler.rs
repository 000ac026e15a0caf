//! Upload admission and dispatch.
//!
//! The queue decides which pending upload may begin transferring bytes,
//! under a global concurrency cap, per-group caps, strict priority between
//! groups, and a per-group ordering strategy. Producers enqueue, the
//! transfer engine awaits a slot, and every state change runs one admission
//! pass that releases at most one upload.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{QueueOptions, Strategy};
use crate::directory::UserDirectory;
use crate::errors::{QueueError, Result};
use crate::estimator;
use crate::group::GroupTable;
use crate::registry::Registry;
use crate::status::{GroupSnapshot, QueueSnapshot, UploadSnapshot};

/// Resolves when an admission pass grants the upload a slot.
///
/// Dropping the future does not withdraw the upload; the engine still owes a
/// [`UploadQueue::complete`] call for every successful `await_start`.
#[derive(Debug)]
pub struct StartFuture {
    rx: oneshot::Receiver<()>,
}

impl Future for StartFuture {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx)
            .poll(cx)
            .map(|result| result.map_err(|_| QueueError::Cancelled))
    }
}

/// A granted slot, reported out of the admission pass so the waiter can be
/// signalled after the lock is dropped
struct Released {
    username: String,
    filename: String,
    group: String,
    start_tx: oneshot::Sender<()>,
}

/// One ready upload, bucketed under its user's current group
struct Candidate {
    username: String,
    seq: u64,
    enqueued_at: DateTime<Utc>,
    ready_at: DateTime<Utc>,
    ready_seq: u64,
}

struct State {
    registry: Registry,
    groups: GroupTable,
    last_options_hash: Option<u64>,
    last_global_slots: usize,
}

/// Upload admission and dispatch scheduler.
///
/// All operations serialize on one internal lock and finish in time bounded
/// by the queue size. The only unbounded wait is the future returned by
/// [`await_start`](Self::await_start), which suspends outside the lock.
///
/// Group membership is resolved through the [`UserDirectory`] at selection
/// time, so users reclassified between enqueue and release are scheduled
/// under their current group.
pub struct UploadQueue {
    directory: Arc<dyn UserDirectory>,
    state: Mutex<State>,
}

impl std::fmt::Debug for UploadQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadQueue").finish_non_exhaustive()
    }
}

impl UploadQueue {
    /// Create a queue with the given user directory and initial options.
    ///
    /// Fails on invalid options; at construction there is no previous
    /// configuration to fall back to.
    pub fn new(directory: Arc<dyn UserDirectory>, options: &QueueOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            directory,
            state: Mutex::new(State {
                registry: Registry::default(),
                groups: GroupTable::build(options, None),
                last_options_hash: Some(options.group_hash()),
                last_global_slots: options.slots,
            }),
        })
    }

    /// Register a new upload for `username`.
    ///
    /// Duplicate filenames are kept as distinct entries; the engine
    /// completes them one at a time, oldest first.
    pub fn enqueue(&self, username: &str, filename: &str) {
        let released = {
            let mut state = self.lock();
            state.registry.add(username, filename);
            debug!("Upload enqueued: {}/{}", username, filename);
            Self::release_next(&*self.directory, &mut state)
        };
        self.signal(released);
    }

    /// Mark the upload as awaiting a slot and return a future that resolves
    /// when an admission pass releases it.
    ///
    /// Fails with [`QueueError::NotEnqueued`] for an unknown pair and
    /// [`QueueError::AlreadyAwaited`] on a second call for the same upload.
    pub fn await_start(&self, username: &str, filename: &str) -> Result<StartFuture> {
        let (rx, released) = {
            let mut state = self.lock();
            let ticket = state.registry.next_ticket();
            let upload = state
                .registry
                .find_mut(username, filename)
                .ok_or_else(|| QueueError::not_enqueued(username, filename))?;
            if upload.ready_at.is_some() {
                return Err(QueueError::already_awaited(username, filename));
            }
            let (tx, rx) = oneshot::channel();
            upload.ready_at = Some(Utc::now());
            upload.ready_seq = Some(ticket);
            upload.start_tx = Some(tx);
            debug!("Upload awaiting slot: {}/{}", username, filename);
            (rx, Self::release_next(&*self.directory, &mut state))
        };
        self.signal(released);
        Ok(StartFuture { rx })
    }

    /// Remove the upload and return its slot to the group it was borrowed
    /// from, then run an admission pass.
    ///
    /// Must be called exactly once per successful `await_start`, whether the
    /// transfer succeeded, failed, or was cancelled.
    pub fn complete(&self, username: &str, filename: &str) -> Result<()> {
        let released = {
            let mut state = self.lock();
            let seq = state
                .registry
                .find(username, filename)
                .ok_or_else(|| QueueError::not_enqueued(username, filename))?
                .seq;
            let upload = state
                .registry
                .remove(username, seq)
                .expect("upload vanished between find and remove");
            match upload.pinned_group.as_deref() {
                Some(pinned) => match state.groups.get_mut(pinned) {
                    Some(group) => {
                        group.used_slots = group.used_slots.saturating_sub(1);
                        debug!(
                            "Upload complete: {}/{}, slot returned to {}",
                            username, filename, pinned
                        );
                    }
                    // The pinned group was removed by a rebuild; its
                    // accounting went with it.
                    None => debug!(
                        "Upload complete: {}/{}, pinned group {} no longer exists",
                        username, filename, pinned
                    ),
                },
                None => debug!("Upload withdrawn before start: {}/{}", username, filename),
            }
            Self::release_next(&*self.directory, &mut state)
        };
        self.signal(released);
        Ok(())
    }

    /// Like [`complete`](Self::complete), but reports an unknown upload as
    /// `false` instead of an error, for engine teardown paths
    pub fn try_complete(&self, username: &str, filename: &str) -> bool {
        self.complete(username, filename).is_ok()
    }

    /// Apply a new options snapshot.
    ///
    /// Identical options (same group definitions and global cap) are a
    /// no-op. Invalid options are rejected as a unit and the previous
    /// configuration stays in force. Slot accounting is carried over for
    /// every group whose name survives the rebuild, so in-flight uploads
    /// keep their slots accounted for.
    pub fn reconfigure(&self, options: &QueueOptions) -> Result<()> {
        if let Err(err) = options.validate() {
            warn!("Rejecting upload queue options: {}", err);
            return Err(err);
        }
        let released = {
            let mut state = self.lock();
            let hash = options.group_hash();
            if state.last_options_hash == Some(hash) && state.last_global_slots == options.slots {
                return Ok(());
            }
            state.groups = GroupTable::build(options, Some(&state.groups));
            state.last_options_hash = Some(hash);
            state.last_global_slots = options.slots;
            info!(
                "Upload queue reconfigured: {} global slots, {} groups",
                options.slots,
                options.user_defined.len() + 3
            );
            Self::release_next(&*self.directory, &mut state)
        };
        self.signal(released);
        Ok(())
    }

    /// Spawn a task that applies every options snapshot published on `rx`.
    ///
    /// Invalid snapshots are logged and skipped; the task ends when the
    /// sending side is dropped.
    pub fn watch(self: Arc<Self>, mut rx: watch::Receiver<QueueOptions>) -> JoinHandle<()> {
        let queue = self;
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let options = rx.borrow_and_update().clone();
                // reconfigure already logged any rejection.
                let _ = queue.reconfigure(&options);
            }
        })
    }

    /// True when `username`'s current group exists and has a free slot
    pub fn is_slot_available(&self, username: &str) -> bool {
        let state = self.lock();
        estimator::slot_available(&state.groups, &*self.directory, username)
    }

    /// Estimated position a new upload from `username` would take: 0 when a
    /// slot is free, otherwise the number of uploads tracked for users in
    /// the same group
    pub fn estimate_position(&self, username: &str) -> usize {
        let state = self.lock();
        estimator::position_for_user(&state.registry, &state.groups, &*self.directory, username)
    }

    /// Estimated position of an enqueued upload within its group's release
    /// order.
    ///
    /// Fails with [`QueueError::NotEnqueued`] when the pair is unknown.
    pub fn estimate_position_of(&self, username: &str, filename: &str) -> Result<usize> {
        let state = self.lock();
        estimator::position_of(
            &state.registry,
            &state.groups,
            &*self.directory,
            username,
            filename,
        )
    }

    /// Point-in-time view of group accounting and tracked uploads
    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.lock();
        let groups = state
            .groups
            .ordered()
            .into_iter()
            .map(|group| GroupSnapshot {
                name: group.name.clone(),
                priority: group.priority,
                slots: group.slots,
                used_slots: group.used_slots,
                strategy: group.strategy,
            })
            .collect();
        let mut uploads: Vec<_> = state.registry.iter().collect();
        uploads.sort_by_key(|upload| upload.seq);
        let uploads = uploads
            .into_iter()
            .map(|upload| UploadSnapshot {
                username: upload.username.clone(),
                filename: upload.filename.clone(),
                enqueued_at: upload.enqueued_at,
                ready_at: upload.ready_at,
                started_at: upload.started_at,
                pinned_group: upload.pinned_group.clone(),
            })
            .collect();
        QueueSnapshot {
            max_slots: state.groups.max_slots(),
            used_slots: state.groups.total_used(),
            groups,
            uploads,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("upload queue lock poisoned")
    }

    /// One admission pass: release at most one ready upload.
    ///
    /// Groups are walked in ascending (priority, name) order; the first
    /// group under both its own cap and the global cap with a ready upload
    /// wins. FIFO groups pick the oldest enqueue, round-robin groups the
    /// oldest readiness. The winner is stamped, pinned, and counted here;
    /// the caller signals its waiter after dropping the lock.
    fn release_next(directory: &dyn UserDirectory, state: &mut State) -> Option<Released> {
        if state.groups.total_used() >= state.groups.max_slots() {
            return None;
        }

        // Bucket ready uploads by their user's current group. Users whose
        // group is not in the table wait until they are reassigned.
        let mut buckets: HashMap<String, Vec<Candidate>> = HashMap::new();
        for username in state.registry.users() {
            let group = directory.group_of(username);
            if !state.groups.contains(&group) {
                continue;
            }
            for upload in state.registry.user_uploads(username) {
                if upload.is_ready() {
                    buckets.entry(group.clone()).or_default().push(Candidate {
                        username: upload.username.clone(),
                        seq: upload.seq,
                        enqueued_at: upload.enqueued_at,
                        ready_at: upload.ready_at.expect("ready upload without ready_at"),
                        ready_seq: upload.ready_seq.expect("ready upload without ready_seq"),
                    });
                }
            }
        }
        if buckets.is_empty() {
            return None;
        }

        let mut winner: Option<(String, String, u64)> = None;
        for group in state.groups.ordered() {
            if group.used_slots >= group.slots {
                continue;
            }
            let Some(bucket) = buckets.get(&group.name) else {
                continue;
            };
            let pick = match group.strategy {
                Strategy::FirstInFirstOut => bucket
                    .iter()
                    .min_by_key(|candidate| (candidate.enqueued_at, candidate.seq)),
                Strategy::RoundRobin => bucket
                    .iter()
                    .min_by_key(|candidate| (candidate.ready_at, candidate.ready_seq)),
            };
            if let Some(pick) = pick {
                winner = Some((group.name.clone(), pick.username.clone(), pick.seq));
                break;
            }
        }
        let (group_name, username, seq) = winner?;

        let upload = state
            .registry
            .get_mut(&username, seq)
            .expect("winning upload disappeared during the admission pass");
        upload.started_at = Some(Utc::now());
        upload.pinned_group = Some(group_name.clone());
        let filename = upload.filename.clone();
        let start_tx = upload
            .start_tx
            .take()
            .expect("ready upload has no start channel");
        state
            .groups
            .get_mut(&group_name)
            .expect("winning group disappeared during the admission pass")
            .used_slots += 1;

        debug_assert!(state.groups.total_used() <= state.groups.max_slots());

        Some(Released {
            username,
            filename,
            group: group_name,
            start_tx,
        })
    }

    /// Signal a released upload's waiter. Always called after the state
    /// lock has been dropped so the waiter never contends with the pass
    /// that released it.
    fn signal(&self, released: Option<Released>) {
        if let Some(released) = released {
            info!(
                "Upload released: {}/{} via group {}",
                released.username, released.filename, released.group
            );
            // The waiter may have dropped its future; the engine still owes
            // a complete() for this upload either way.
            let _ = released.start_tx.send(());
        }
    }
}
