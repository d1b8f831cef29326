//! Thread-safe in-memory caches. Writers take a short write lock; readers never observe a partially
//! applied call.
use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::RwLock,
};

use crate::{
    dtos::{ChangeNumber, Split, NO_CHANGE_NUMBER},
    storage::{MySegmentsCache, SegmentsCache, SplitsCache},
    Result,
};

#[derive(Debug)]
struct SplitsState {
    change_number: ChangeNumber,
    splits: HashMap<String, String>,
}

/// In-memory [`SplitsCache`].
#[derive(Debug)]
pub struct InMemorySplitsCache {
    state: RwLock<SplitsState>,
}

impl InMemorySplitsCache {
    /// Create a new empty cache.
    pub fn new() -> Self {
        InMemorySplitsCache {
            state: RwLock::new(SplitsState {
                change_number: NO_CHANGE_NUMBER,
                splits: HashMap::new(),
            }),
        }
    }

    /// Serialized definition of a split.
    pub fn get_split(&self, name: &str) -> Option<String> {
        self.read().splits.get(name).cloned()
    }

    /// Names of all cached splits.
    pub fn split_names(&self) -> Vec<String> {
        self.read().splits.keys().cloned().collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, SplitsState> {
        // Err() is possible only if the lock is poisoned (writer panicked while holding the
        // lock), which should never happen.
        self.state
            .read()
            .expect("thread holding splits cache lock should not panic")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, SplitsState> {
        self.state
            .write()
            .expect("thread holding splits cache lock should not panic")
    }
}

impl Default for InMemorySplitsCache {
    fn default() -> Self {
        InMemorySplitsCache::new()
    }
}

impl SplitsCache for InMemorySplitsCache {
    fn change_number(&self) -> ChangeNumber {
        self.read().change_number
    }

    fn set_change_number(&self, change_number: ChangeNumber) -> Result<()> {
        let mut state = self.write();
        // Never regress.
        state.change_number = state.change_number.max(change_number);
        Ok(())
    }

    fn add_splits(&self, entries: &[(String, String)]) -> Result<()> {
        let mut state = self.write();
        for (name, definition) in entries {
            state.splits.insert(name.clone(), definition.clone());
        }
        Ok(())
    }

    fn remove_splits(&self, names: &[String]) -> Result<()> {
        let mut state = self.write();
        for name in names {
            state.splits.remove(name);
        }
        Ok(())
    }

    fn check_cache(&self) -> bool {
        self.read().change_number > NO_CHANGE_NUMBER
    }

    fn kill_locally(
        &self,
        name: &str,
        default_treatment: &str,
        change_number: ChangeNumber,
    ) -> Result<bool> {
        let mut state = self.write();
        let Some(definition) = state.splits.get(name) else {
            return Ok(false);
        };

        let mut split: Split = serde_json::from_str(definition)?;
        if split.change_number >= change_number {
            return Ok(false);
        }
        split.killed = true;
        split.default_treatment = default_treatment.to_owned();
        split.change_number = change_number;

        let definition = serde_json::to_string(&split)?;
        state.splits.insert(name.to_owned(), definition);
        Ok(true)
    }
}

#[derive(Debug, Default)]
struct Segment {
    change_number: Option<ChangeNumber>,
    keys: HashSet<String>,
}

/// In-memory [`SegmentsCache`].
#[derive(Debug, Default)]
pub struct InMemorySegmentsCache {
    segments: RwLock<HashMap<String, Segment>>,
}

impl InMemorySegmentsCache {
    /// Create a new empty cache.
    pub fn new() -> Self {
        InMemorySegmentsCache::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Segment>> {
        self.segments
            .read()
            .expect("thread holding segments cache lock should not panic")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Segment>> {
        self.segments
            .write()
            .expect("thread holding segments cache lock should not panic")
    }
}

impl SegmentsCache for InMemorySegmentsCache {
    fn register_segments(&self, names: &[String]) -> Result<()> {
        let mut segments = self.write();
        for name in names {
            segments.entry(name.clone()).or_default();
        }
        Ok(())
    }

    fn registered_segments(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    fn change_number(&self, name: &str) -> ChangeNumber {
        self.read()
            .get(name)
            .and_then(|segment| segment.change_number)
            .unwrap_or(NO_CHANGE_NUMBER)
    }

    fn set_change_number(&self, name: &str, change_number: ChangeNumber) -> Result<()> {
        let mut segments = self.write();
        let segment = segments.entry(name.to_owned()).or_default();
        segment.change_number = Some(
            segment
                .change_number
                .map_or(change_number, |current| current.max(change_number)),
        );
        Ok(())
    }

    fn add_to_segment(&self, name: &str, keys: &[String]) -> Result<()> {
        let mut segments = self.write();
        segments
            .entry(name.to_owned())
            .or_default()
            .keys
            .extend(keys.iter().cloned());
        Ok(())
    }

    fn remove_from_segment(&self, name: &str, keys: &[String]) -> Result<()> {
        let mut segments = self.write();
        if let Some(segment) = segments.get_mut(name) {
            for key in keys {
                segment.keys.remove(key);
            }
        }
        Ok(())
    }

    fn is_in_segment(&self, name: &str, key: &str) -> bool {
        self.read()
            .get(name)
            .is_some_and(|segment| segment.keys.contains(key))
    }
}

/// In-memory [`MySegmentsCache`].
#[derive(Debug, Default)]
pub struct InMemoryMySegmentsCache {
    segments: RwLock<BTreeSet<String>>,
}

impl InMemoryMySegmentsCache {
    /// Create a new empty cache.
    pub fn new() -> Self {
        InMemoryMySegmentsCache::default()
    }
}

impl MySegmentsCache for InMemoryMySegmentsCache {
    fn reset_segments(&self, names: &[String]) -> Result<bool> {
        let new_value: BTreeSet<String> = names.iter().cloned().collect();

        let mut segments = self
            .segments
            .write()
            .expect("thread holding my segments cache lock should not panic");
        if *segments == new_value {
            return Ok(false);
        }
        *segments = new_value;
        Ok(true)
    }

    fn is_in_segment(&self, name: &str) -> bool {
        self.segments
            .read()
            .expect("thread holding my segments cache lock should not panic")
            .contains(name)
    }

    fn segment_names(&self) -> Vec<String> {
        self.segments
            .read()
            .expect("thread holding my segments cache lock should not panic")
            .iter()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::{InMemoryMySegmentsCache, InMemorySegmentsCache, InMemorySplitsCache};
    use crate::storage::{MySegmentsCache, SegmentsCache, SplitsCache};

    #[test]
    fn can_write_splits_from_another_thread() {
        let cache = Arc::new(InMemorySplitsCache::new());
        assert!(!cache.check_cache());

        {
            let cache = cache.clone();
            let _ = std::thread::spawn(move || {
                cache.set_change_number(5).unwrap();
                cache
                    .add_splits(&[("f1".to_owned(), "{}".to_owned())])
                    .unwrap();
            })
            .join();
        }

        assert!(cache.check_cache());
        assert_eq!(cache.change_number(), 5);
        assert_eq!(cache.get_split("f1").as_deref(), Some("{}"));
    }

    #[test]
    fn change_number_never_regresses() {
        let cache = InMemorySplitsCache::new();
        cache.set_change_number(10).unwrap();
        cache.set_change_number(3).unwrap();
        assert_eq!(cache.change_number(), 10);

        let segments = InMemorySegmentsCache::new();
        segments.set_change_number("seg", 10).unwrap();
        segments.set_change_number("seg", 3).unwrap();
        assert_eq!(segments.change_number("seg"), 10);
    }

    #[test]
    fn kill_locally_only_applies_newer_change_numbers() {
        let cache = InMemorySplitsCache::new();
        let definition = json!({
            "name": "f1", "status": "ACTIVE", "changeNumber": 5,
            "killed": false, "defaultTreatment": "on", "conditions": []
        });
        cache
            .add_splits(&[("f1".to_owned(), definition.to_string())])
            .unwrap();

        assert!(!cache.kill_locally("f1", "off", 5).unwrap());
        assert!(!cache.kill_locally("missing", "off", 9).unwrap());
        assert!(cache.kill_locally("f1", "off", 6).unwrap());

        let killed: serde_json::Value =
            serde_json::from_str(&cache.get_split("f1").unwrap()).unwrap();
        assert_eq!(killed["killed"], true);
        assert_eq!(killed["defaultTreatment"], "off");
        assert_eq!(killed["changeNumber"], 6);
    }

    #[test]
    fn segments_membership() {
        let cache = InMemorySegmentsCache::new();
        cache.register_segments(&["seg".to_owned()]).unwrap();
        assert_eq!(cache.change_number("seg"), -1);

        cache
            .add_to_segment("seg", &["a".to_owned(), "b".to_owned()])
            .unwrap();
        cache.remove_from_segment("seg", &["a".to_owned()]).unwrap();

        assert!(!cache.is_in_segment("seg", "a"));
        assert!(cache.is_in_segment("seg", "b"));
        assert_eq!(cache.registered_segments(), ["seg"]);
    }

    #[test]
    fn reset_my_segments_reports_changes() {
        let cache = InMemoryMySegmentsCache::new();
        let names = vec!["a".to_owned(), "b".to_owned()];

        assert!(cache.reset_segments(&names).unwrap());
        assert!(!cache.reset_segments(&names).unwrap());
        assert!(cache.is_in_segment("a"));
        assert!(cache.reset_segments(&[]).unwrap());
        assert!(cache.segment_names().is_empty());
    }
}
