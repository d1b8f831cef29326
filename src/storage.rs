//! Cache capabilities consumed by the synchronization engine.
//!
//! The engine never owns a storage back-end. It writes through these traits, and every method is
//! expected to be cheap and non-blocking. [`in_memory`] contains thread-safe implementations
//! backed by `RwLock`.
use crate::{dtos::ChangeNumber, Result};

pub mod in_memory;

pub use in_memory::{InMemoryMySegmentsCache, InMemorySegmentsCache, InMemorySplitsCache};

/// Storage of split definitions.
pub trait SplitsCache: Send + Sync {
    /// Change number of the last synchronized split changes, or `-1`.
    fn change_number(&self) -> ChangeNumber;

    /// Store a new change number. Must be written before the split bodies it covers.
    fn set_change_number(&self, change_number: ChangeNumber) -> Result<()>;

    /// Insert or replace `(name, serialized definition)` entries.
    fn add_splits(&self, entries: &[(String, String)]) -> Result<()>;

    /// Remove splits by name. Unknown names are ignored.
    fn remove_splits(&self, names: &[String]) -> Result<()>;

    /// Returns `true` when the cache holds data from a previous run.
    fn check_cache(&self) -> bool;

    /// Mark a split as killed with `default_treatment`, if the cached definition is older than
    /// `change_number`. Returns whether the cache changed.
    fn kill_locally(
        &self,
        name: &str,
        default_treatment: &str,
        change_number: ChangeNumber,
    ) -> Result<bool>;
}

/// Storage of segment memberships (server-side: one entry per segment).
pub trait SegmentsCache: Send + Sync {
    /// Make segment names known to the cache so they are synchronized.
    fn register_segments(&self, names: &[String]) -> Result<()>;

    /// All segment names registered so far.
    fn registered_segments(&self) -> Vec<String>;

    /// Change number of a segment, or `-1` when unknown.
    fn change_number(&self, name: &str) -> ChangeNumber;

    #[allow(missing_docs)]
    fn set_change_number(&self, name: &str, change_number: ChangeNumber) -> Result<()>;

    #[allow(missing_docs)]
    fn add_to_segment(&self, name: &str, keys: &[String]) -> Result<()>;

    #[allow(missing_docs)]
    fn remove_from_segment(&self, name: &str, keys: &[String]) -> Result<()>;

    #[allow(missing_docs)]
    fn is_in_segment(&self, name: &str, key: &str) -> bool;
}

/// Storage of the segments a single key belongs to (client-side).
pub trait MySegmentsCache: Send + Sync {
    /// Replace the list of segments. Returns whether it changed.
    fn reset_segments(&self, names: &[String]) -> Result<bool>;

    #[allow(missing_docs)]
    fn is_in_segment(&self, name: &str) -> bool;

    #[allow(missing_docs)]
    fn segment_names(&self) -> Vec<String>;
}
