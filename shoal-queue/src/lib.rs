//! Upload admission and dispatch for the shoal daemon
//!
//! This crate decides which pending upload may begin transferring bytes:
//! - Priority groups with per-group concurrency caps under a global cap
//! - FIFO or round-robin ordering within a group
//! - A rendezvous contract with the transfer engine (enqueue, await a slot,
//!   complete)
//! - Live reconfiguration that preserves in-flight slot accounting
//! - Queue position estimates answered without running a simulation

pub mod config;
pub mod directory;
pub mod errors;
pub mod scheduler;
pub mod status;

mod estimator;
mod group;
mod registry;

pub use config::{
    GroupOptions, QueueOptions, Strategy, DEFAULT_GROUP, LEECHERS_GROUP, PRIVILEGED_GROUP,
};
pub use directory::{StaticDirectory, UserDirectory};
pub use errors::{QueueError, Result};
pub use scheduler::{StartFuture, UploadQueue};
pub use status::{GroupSnapshot, QueueSnapshot, UploadSnapshot};
