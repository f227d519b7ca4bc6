pub mod error;

use crate::error::StoreError;
use koorde_common::{Id, Resource, Space};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

/// In-memory resource store, keyed by ring identifier.
///
/// Cheap to clone; all clones share the same map. The inner lock is held
/// only for the duration of a map operation, never across a suspension
/// point.
#[derive(Debug, Default, Clone)]
pub struct Store(Arc<Mutex<StoreInner>>);

#[derive(Debug, Default)]
struct StoreInner {
    resources: BTreeMap<Id, Resource>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> Result<MutexGuard<'_, StoreInner>, StoreError> {
        self.0
            .lock()
            .map_err(|_| StoreError::Custom("failed to lock the store".to_string()))
    }

    /// Inserts or overwrites the resource under its key.
    pub fn put(&self, resource: Resource) -> Result<(), StoreError> {
        self.inner()?
            .resources
            .insert(resource.key.clone(), resource);
        Ok(())
    }

    pub fn get(&self, key: &Id) -> Result<Resource, StoreError> {
        self.inner()?
            .resources
            .get(key)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    pub fn delete(&self, key: &Id) -> Result<(), StoreError> {
        self.inner()?
            .resources
            .remove(key)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    /// Resources whose key lies in the modular open-closed arc `(a, b]`.
    /// The ownership-repair pass queries the complement of the local
    /// ownership arc through this.
    pub fn range(&self, space: &Space, a: &Id, b: &Id) -> Result<Vec<Resource>, StoreError> {
        Ok(self
            .inner()?
            .resources
            .values()
            .filter(|r| space.between_right_closed(&r.key, a, b))
            .cloned()
            .collect())
    }

    /// Snapshot of every stored resource; backs the leave handoff.
    pub fn all(&self) -> Result<Vec<Resource>, StoreError> {
        Ok(self.inner()?.resources.values().cloned().collect())
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.inner()?.resources.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.inner()?.resources.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> Space {
        Space::new(8, 2, 2).unwrap()
    }

    fn resource(space: &Space, key: u64, raw: &str, value: &str) -> Resource {
        Resource::new(space.id_from_u64(key), raw, value)
    }

    #[test]
    fn put_then_get_returns_value() {
        let space = space();
        let store = Store::new();
        store.put(resource(&space, 0x10, "a", "1")).unwrap();
        let got = store.get(&space.id_from_u64(0x10)).unwrap();
        assert_eq!(got.raw_key, "a");
        assert_eq!(got.value, "1");
    }

    #[test]
    fn put_overwrites_existing_key() {
        let space = space();
        let store = Store::new();
        store.put(resource(&space, 0x10, "a", "1")).unwrap();
        store.put(resource(&space, 0x10, "a", "2")).unwrap();
        assert_eq!(store.get(&space.id_from_u64(0x10)).unwrap().value, "2");
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn delete_then_get_is_not_found() {
        let space = space();
        let store = Store::new();
        store.put(resource(&space, 0x10, "a", "1")).unwrap();
        store.delete(&space.id_from_u64(0x10)).unwrap();
        assert_eq!(
            store.get(&space.id_from_u64(0x10)).unwrap_err(),
            StoreError::NotFound
        );
        assert_eq!(
            store.delete(&space.id_from_u64(0x10)).unwrap_err(),
            StoreError::NotFound
        );
    }

    #[test]
    fn range_respects_wraparound_and_right_closure() {
        let space = space();
        let store = Store::new();
        for key in [0x10u64, 0x40, 0x80, 0xF0] {
            store
                .put(resource(&space, key, &format!("k{key}"), "v"))
                .unwrap();
        }
        // (0x40, 0x80]: excludes 0x40, includes 0x80.
        let hits = store
            .range(&space, &space.id_from_u64(0x40), &space.id_from_u64(0x80))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, space.id_from_u64(0x80));
        // Wrapping arc (0xE0, 0x20] picks up both ends of the ring.
        let hits = store
            .range(&space, &space.id_from_u64(0xE0), &space.id_from_u64(0x20))
            .unwrap();
        let keys: Vec<_> = hits.iter().map(|r| r.key.clone()).collect();
        assert!(keys.contains(&space.id_from_u64(0xF0)));
        assert!(keys.contains(&space.id_from_u64(0x10)));
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn all_snapshots_every_resource() {
        let space = space();
        let store = Store::new();
        assert!(store.is_empty().unwrap());
        for key in 0..5u64 {
            store.put(resource(&space, key, &format!("k{key}"), "v")).unwrap();
        }
        assert_eq!(store.all().unwrap().len(), 5);
    }
}
