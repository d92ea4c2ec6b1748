//! Concurrent focus target → input source mapping.

use std::{collections::HashMap, sync::Arc};

use keyfocus_ids::FocusTargetId;
use parking_lot::RwLock;

use crate::Preference;

#[derive(Default)]
struct Inner {
    map: RwLock<HashMap<FocusTargetId, Preference>>,
    default: RwLock<Option<Preference>>,
}

/// Shared preference store.
///
/// Clones share state. Reads take a shared lock and may run in parallel with
/// each other; writes are exclusive, so a completed [`set`](Self::set) is
/// visible to every later [`get`](Self::get) on any thread.
#[derive(Clone, Default)]
pub struct PreferenceStore {
    inner: Arc<Inner>,
}

impl PreferenceStore {
    /// Create an empty store with no default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mapped preference for `id`.
    pub fn get(&self, id: &FocusTargetId) -> Option<Preference> {
        self.inner.map.read().get(id).cloned()
    }

    /// Map `id` to `pref`, returning the previous mapping.
    pub fn set(&self, id: FocusTargetId, pref: Preference) -> Option<Preference> {
        self.inner.map.write().insert(id, pref)
    }

    /// Remove the mapping for `id`. Missing keys are a no-op.
    pub fn remove(&self, id: &FocusTargetId) -> Option<Preference> {
        self.inner.map.write().remove(id)
    }

    /// Drop every mapping, returning how many were removed. The default is kept.
    pub fn clear(&self) -> usize {
        let mut map = self.inner.map.write();
        let n = map.len();
        map.clear();
        n
    }

    /// Replace the default preference.
    pub fn set_default(&self, pref: Preference) {
        *self.inner.default.write() = Some(pref);
    }

    /// Current default preference.
    pub fn get_default(&self) -> Option<Preference> {
        self.inner.default.read().clone()
    }

    /// Number of mapped targets.
    pub fn len(&self) -> usize {
        self.inner.map.read().len()
    }

    /// True when no target is mapped.
    pub fn is_empty(&self) -> bool {
        self.inner.map.read().is_empty()
    }

    /// Sorted copy of all mappings, for diagnostics.
    pub fn snapshot(&self) -> Vec<(FocusTargetId, Preference)> {
        let mut out: Vec<_> = self
            .inner
            .map
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use keyfocus_ids::{ProcessInfo, TrackingMode, resolve};
    use proptest::prelude::*;

    use super::*;

    fn id(bundle: &str) -> FocusTargetId {
        resolve(&ProcessInfo::new(1, bundle), TrackingMode::PerApplication)
    }

    fn pref(id: &str) -> Preference {
        Preference::new(id, id)
    }

    #[test]
    fn set_get_remove() {
        let store = PreferenceStore::new();
        assert!(store.get(&id("a")).is_none());
        assert!(store.set(id("a"), pref("en")).is_none());
        assert_eq!(store.get(&id("a")), Some(pref("en")));
        assert_eq!(store.set(id("a"), pref("fr")), Some(pref("en")));
        assert_eq!(store.remove(&id("a")), Some(pref("fr")));
        assert!(store.remove(&id("a")).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn new_store_is_empty_and_clear_keeps_default() {
        let store = PreferenceStore::new();
        assert!(store.is_empty());
        assert!(store.get_default().is_none());
        store.set_default(pref("en"));
        assert_eq!(store.get_default(), Some(pref("en")));
        assert!(store.get(&id("a")).is_none(), "default is not a mapping");
        store.set(id("b"), pref("de"));
        assert_eq!(store.clear(), 1);
        assert_eq!(store.clear(), 0);
        assert_eq!(store.get_default(), Some(pref("en")));
    }

    #[test]
    fn clones_share_state() {
        let store = PreferenceStore::new();
        let other = store.clone();
        store.set(id("a"), pref("en"));
        assert_eq!(other.get(&id("a")), Some(pref("en")));
    }

    #[test]
    fn writes_visible_across_threads() {
        let store = PreferenceStore::new();
        thread::scope(|s| {
            for t in 0..4 {
                let store = store.clone();
                s.spawn(move || {
                    for i in 0..200 {
                        let key = id(&format!("app{t}-{i}"));
                        let p = pref(&format!("src{i}"));
                        store.set(key.clone(), p.clone());
                        assert_eq!(store.get(&key), Some(p));
                    }
                });
            }
            // Concurrent readers on a shared key.
            for _ in 0..4 {
                let store = store.clone();
                s.spawn(move || {
                    for _ in 0..200 {
                        let _ = store.get(&id("shared"));
                    }
                });
            }
        });
        assert_eq!(store.len(), 800);
    }

    proptest! {
        #[test]
        fn clear_empties_every_key(keys in proptest::collection::vec("[a-z]{1,8}", 0..32)) {
            let store = PreferenceStore::new();
            for k in &keys {
                store.set(id(k), pref(k));
            }
            store.clear();
            for k in &keys {
                prop_assert!(store.get(&id(k)).is_none());
            }
            prop_assert!(store.is_empty());
        }

        #[test]
        fn last_write_wins(writes in proptest::collection::vec(("[a-c]", "[x-z]"), 1..32)) {
            let store = PreferenceStore::new();
            for (k, v) in &writes {
                store.set(id(k), pref(v));
                prop_assert_eq!(store.get(&id(k)), Some(pref(v)));
            }
        }
    }
}
