//! Concurrent entity indexes.
//!
//! A router keeps the same client entity under several keys: by session id,
//! by client id and in its group's member list. Each index holds a reference
//! on the entity and registers itself with the entity's
//! [`IdleComponent`](crate::IdleComponent), so expiry removes the entity
//! from all of them.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Weak};

use dashmap::DashMap;

use crate::entity::Entity;
use crate::idle::IdleComponent;

/// An index that can drop every entry pointing at an entity.
pub trait EntityIndex: Send + Sync {
    /// Remove and release every entry referring to `entity`.
    fn evict(&self, entity: &Entity);
}

fn same(a: &Arc<Entity>, b: &Entity) -> bool {
    std::ptr::eq(Arc::as_ptr(a), b)
}

fn register(index: Weak<dyn EntityIndex>, entity: &Entity) {
    if let Some(idle) = entity.get::<IdleComponent>() {
        idle.register(index);
    }
}

fn deregister(index: &Weak<dyn EntityIndex>, entity: &Entity) {
    if let Some(idle) = entity.get::<IdleComponent>() {
        idle.deregister(index);
    }
}

/// One entity per key.
pub struct EntityMap<K> {
    name: &'static str,
    map: DashMap<K, Arc<Entity>>,
    weak_self: Weak<Self>,
}

impl<K> EntityMap<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    /// Create an empty index. `name` only appears in logs.
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            name,
            map: DashMap::new(),
            weak_self: weak.clone(),
        })
    }

    fn handle(&self) -> Weak<dyn EntityIndex> {
        self.weak_self.clone()
    }

    /// Insert `entity` under `key`, taking a reference.
    ///
    /// An entity previously stored under the key is released.
    pub fn add(&self, key: K, entity: Arc<Entity>) {
        entity.acquire();
        register(self.handle(), &entity);

        let replaced = self.map.insert(key.clone(), entity);
        tracing::trace!(index = self.name, ?key, "add");
        if let Some(old) = replaced {
            self.forget(&old);
        }
    }

    /// Look up the entity under `key`.
    pub fn get(&self, key: &K) -> Option<Arc<Entity>> {
        self.map.get(key).map(|e| e.value().clone())
    }

    /// True when `key` is present.
    pub fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// Remove the entry under `key`, releasing the entity.
    pub fn remove(&self, key: &K) -> Option<Arc<Entity>> {
        let (_, entity) = self.map.remove(key)?;
        tracing::trace!(index = self.name, ?key, "remove");
        self.forget(&entity);
        Some(entity)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True when the index is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Snapshot of every stored entity.
    pub fn entities(&self) -> Vec<Arc<Entity>> {
        self.map.iter().map(|e| e.value().clone()).collect()
    }

    /// Snapshot of every key.
    pub fn keys(&self) -> Vec<K> {
        self.map.iter().map(|e| e.key().clone()).collect()
    }

    /// Release and drop every entry.
    pub fn clear(&self) {
        for key in self.keys() {
            self.remove(&key);
        }
    }

    fn forget(&self, entity: &Arc<Entity>) {
        if !self.map.iter().any(|e| Arc::ptr_eq(e.value(), entity)) {
            deregister(&self.handle(), entity);
        }
        entity.release();
    }
}

impl<K> EntityIndex for EntityMap<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    fn evict(&self, entity: &Entity) {
        let keys: Vec<K> = self
            .map
            .iter()
            .filter(|e| same(e.value(), entity))
            .map(|e| e.key().clone())
            .collect();

        for key in keys {
            if let Some((_, removed)) = self.map.remove(&key) {
                tracing::debug!(index = self.name, ?key, "evicted");
                removed.release();
            }
        }
    }
}

impl<K: Eq + Hash> Debug for EntityMap<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityMap")
            .field("name", &self.name)
            .field("len", &self.map.len())
            .finish()
    }
}

/// Many entities per key, such as the members of a group.
///
/// A key disappears as soon as its list becomes empty.
pub struct EntityListMap<K> {
    name: &'static str,
    map: DashMap<K, Vec<Arc<Entity>>>,
    weak_self: Weak<Self>,
}

impl<K> EntityListMap<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    /// Create an empty index.
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            name,
            map: DashMap::new(),
            weak_self: weak.clone(),
        })
    }

    fn handle(&self) -> Weak<dyn EntityIndex> {
        self.weak_self.clone()
    }

    /// Append `entity` to the list under `key`. Adding twice is a no-op.
    pub fn add(&self, key: K, entity: Arc<Entity>) {
        let inserted = {
            let mut list = self.map.entry(key.clone()).or_default();
            if list.iter().any(|e| Arc::ptr_eq(e, &entity)) {
                false
            } else {
                list.push(entity.clone());
                true
            }
        };

        if inserted {
            entity.acquire();
            register(self.handle(), &entity);
            tracing::trace!(index = self.name, ?key, "add");
        }
    }

    /// Remove `entity` from the list under `key`. Returns whether it was there.
    pub fn remove(&self, key: &K, entity: &Arc<Entity>) -> bool {
        let removed = match self.map.get_mut(key) {
            Some(mut list) => {
                let before = list.len();
                list.retain(|e| !Arc::ptr_eq(e, entity));
                before != list.len()
            }
            None => false,
        };
        if !removed {
            return false;
        }

        self.map.remove_if(key, |_, list| list.is_empty());
        if !self.holds(entity) {
            deregister(&self.handle(), entity);
        }
        entity.release();
        true
    }

    /// Snapshot of the list under `key`.
    pub fn get(&self, key: &K) -> Vec<Arc<Entity>> {
        self.map
            .get(key)
            .map(|list| list.value().clone())
            .unwrap_or_default()
    }

    /// True when `key` has at least one entity.
    pub fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True when no key is present.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Release and drop every entry.
    pub fn clear(&self) {
        let keys: Vec<K> = self.map.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            for entity in self.get(&key) {
                self.remove(&key, &entity);
            }
        }
    }

    fn holds(&self, entity: &Arc<Entity>) -> bool {
        self.map
            .iter()
            .any(|list| list.value().iter().any(|e| Arc::ptr_eq(e, entity)))
    }
}

impl<K> EntityIndex for EntityListMap<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    fn evict(&self, entity: &Entity) {
        let mut removed = Vec::new();
        for mut list in self.map.iter_mut() {
            list.value_mut().retain(|e| {
                if same(e, entity) {
                    removed.push(e.clone());
                    false
                } else {
                    true
                }
            });
        }
        self.map.retain(|key, list| {
            if list.is_empty() {
                tracing::debug!(index = self.name, ?key, "dropped empty list");
            }
            !list.is_empty()
        });

        for entity in removed {
            entity.release();
        }
    }
}

impl<K: Eq + Hash> Debug for EntityListMap<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityListMap")
            .field("name", &self.name)
            .field("len", &self.map.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    // ===== EntityMap =====

    #[test]
    fn debug_shows_name_and_len() {
        let map = EntityMap::<u32>::new("sessions");
        map.add(1, Entity::new());
        assert_eq!(format!("{:?}", map), "EntityMap { name: \"sessions\", len: 1 }");

        let lists = EntityListMap::<u32>::new("groups");
        assert_eq!(format!("{:?}", lists), "EntityListMap { name: \"groups\", len: 0 }");
    }

    #[test]
    fn map_add_takes_reference() {
        let map = EntityMap::<u32>::new("test");
        let entity = Entity::new();
        map.add(1, entity.clone());
        map.add(2, entity.clone());
        assert_eq!(entity.ref_count(), 2);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn map_remove_releases_and_last_release_shuts_down() {
        let map = EntityMap::<u32>::new("test");
        let entity = Entity::new();
        map.add(1, entity.clone());

        let removed = map.remove(&1).unwrap();
        assert!(Arc::ptr_eq(&removed, &entity));
        assert_eq!(entity.ref_count(), 0);
        assert!(entity.is_shutdown());
        assert!(map.remove(&1).is_none());
    }

    #[test]
    fn map_replace_releases_previous() {
        let map = EntityMap::<u32>::new("test");
        let first = Entity::new();
        let second = Entity::new();
        map.add(1, first.clone());
        map.add(1, second.clone());

        assert!(first.is_shutdown());
        assert!(!second.is_shutdown());
        assert!(Arc::ptr_eq(&map.get(&1).unwrap(), &second));
    }

    #[test]
    fn map_evict_removes_every_key_for_entity() {
        let map = EntityMap::<u32>::new("test");
        let entity = Entity::new();
        let other = Entity::new();
        map.add(1, entity.clone());
        map.add(2, entity.clone());
        map.add(3, other.clone());

        map.evict(&entity);
        assert_eq!(map.keys(), vec![3]);
        assert_eq!(entity.ref_count(), 0);
    }

    #[tokio::test]
    async fn map_registers_with_idle_component() {
        let map = EntityMap::<u32>::new("test");
        let entity = Entity::new();
        let idle = entity.add(IdleComponent::new(Duration::from_secs(60)));

        map.add(1, entity.clone());
        map.add(2, entity.clone());
        assert_eq!(idle.index_count(), 1);

        map.remove(&1);
        assert_eq!(idle.index_count(), 1);
        map.remove(&2);
        assert_eq!(idle.index_count(), 0);
    }

    #[test]
    fn map_clear_releases_everything() {
        let map = EntityMap::<u32>::new("test");
        let entity = Entity::new();
        map.add(1, entity.clone());
        map.add(2, entity.clone());
        map.clear();
        assert!(map.is_empty());
        assert!(entity.is_shutdown());
    }

    // ===== EntityListMap =====

    #[test]
    fn list_add_is_idempotent() {
        let groups = EntityListMap::<&'static str>::new("groups");
        let entity = Entity::new();
        groups.add("g", entity.clone());
        groups.add("g", entity.clone());
        assert_eq!(groups.get(&"g").len(), 1);
        assert_eq!(entity.ref_count(), 1);
    }

    #[test]
    fn list_remove_drops_empty_key() {
        let groups = EntityListMap::<&'static str>::new("groups");
        let a = Entity::new();
        let b = Entity::new();
        groups.add("g", a.clone());
        groups.add("g", b.clone());

        assert!(groups.remove(&"g", &a));
        assert!(groups.contains(&"g"));
        assert!(!groups.remove(&"g", &a));
        assert!(groups.remove(&"g", &b));
        assert!(!groups.contains(&"g"));
        assert!(groups.get(&"g").is_empty());
    }

    #[test]
    fn list_evict_spans_keys() {
        let groups = EntityListMap::<&'static str>::new("groups");
        let entity = Entity::new();
        let other = Entity::new();
        groups.add("a", entity.clone());
        groups.add("b", entity.clone());
        groups.add("b", other.clone());

        groups.evict(&entity);
        assert!(!groups.contains(&"a"));
        assert_eq!(groups.get(&"b").len(), 1);
        assert_eq!(entity.ref_count(), 0);
        assert_eq!(other.ref_count(), 1);
    }
}
