//! `split_sync` keeps a local cache of feature flag ("split") definitions and segment memberships
//! synchronized with the Split backend, and tells consuming code when the cache is ready to be
//! used for evaluation.
//!
//! # Overview
//!
//! The crate is organized as a set of building blocks. Most users only need a
//! [`SyncManager`](sync::SyncManager), which wires all of them together.
//!
//! [`SplitApi`](api::SplitApi) is the fetch capability: it knows how to fetch split, segment and
//! my-segments changes. [`HttpSplitApi`](api::HttpSplitApi) implements it on top of `reqwest`.
//!
//! The [`storage`] traits are the cache capability. The engine only ever writes through them, so
//! any back-end can be plugged in. Thread-safe in-memory implementations are provided.
//!
//! [`SyncTask`](sync::SyncTask) turns an [`Updater`](sync::Updater) into a periodic task whose
//! executions never overlap. The [`polling`](sync::polling) updaters fetch changes since the
//! cached version, apply them to the caches and feed the [`ReadinessManager`].
//!
//! The [`streaming`](sync::streaming) update workers consume push notifications and converge the
//! caches to the highest announced version, throttled by a [`Backoff`](backoff::Backoff) and
//! escalating to a CDN bypass when refreshes are unproductive.
//!
//! [`ReadinessManager`] aggregates "splits arrived" and "segments arrived" signals into
//! [`SdkEvent`]s, delivered through a typed broadcast channel.
//!
//! # Runtime
//!
//! All timers are Tokio timers. Components that arm timers (tasks, workers, the ready timeout)
//! must be used from within a Tokio runtime.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum. Declared synchronization failures (see
//! [`Error::is_sync_error`]) are retried and logged; they never break the periodic schedule. Any
//! other error is reported to an [`UncaughtErrorSink`](sync::UncaughtErrorSink).
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate with the `splitio` target.
//! Consider integrating a `log`-compatible logger implementation for better visibility into
//! synchronization.

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

pub mod api;
pub mod backoff;
pub mod dtos;
pub mod readiness;
pub mod storage;
pub mod sync;

mod config;
mod error;

#[cfg(test)]
mod test_utils;

pub use config::SyncConfig;
pub use error::{Error, Result};
pub use readiness::{ReadinessManager, SdkEvent};
