//! Entity/component registry.
//!
//! An [`Entity`] is an identity (id, display name, reference count) that owns
//! at most one component per component type. Components are looked up by
//! their Rust type and handed back as typed `Arc`s:
//!
//! ```ignore
//! let entity = Entity::new();
//! entity.add(IdleComponent::new(Duration::from_secs(60)));
//! let idle = entity.get::<IdleComponent>().unwrap();
//! ```
//!
//! Lifecycle hooks run outside the registry lock, so a hook may freely call
//! back into its owner.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use shroud_types::EntityId;
use thiserror::Error;

/// Entity lookup errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EntityError {
    /// The entity has no component of the requested type.
    #[error("entity {entity} has no {component} component")]
    MissingComponent {
        /// Entity id.
        entity: String,
        /// Requested component type.
        component: &'static str,
    },

    /// The entity was already shut down.
    #[error("entity {0} is shut down")]
    ShutDown(String),
}

/// Unit of state or behavior attached to an entity.
pub trait Component: Any + Send + Sync {
    /// Called once the component is attached.
    fn init(&self, _owner: &Weak<Entity>) {}

    /// Called on every entity activity.
    fn update(&self) {}

    /// Called when the component is removed or the entity shuts down.
    fn shutdown(&self) {}

    /// An entity is valid only while every component is.
    fn valid(&self) -> bool {
        true
    }

    /// Called after any component is added to or removed from the owner.
    fn on_entity_changed(&self, _owner: &Entity) {}
}

#[derive(Clone)]
struct Slot {
    component: Arc<dyn Component>,
    any: Arc<dyn Any + Send + Sync>,
}

/// A composition container keyed by component type.
pub struct Entity {
    id: RwLock<EntityId>,
    name: RwLock<String>,
    refs: AtomicUsize,
    shut_down: AtomicBool,
    components: Mutex<HashMap<TypeId, Slot>>,
    scope: tokio::sync::Mutex<()>,
    weak_self: Weak<Entity>,
}

impl Entity {
    /// Create an entity with a random id.
    pub fn new() -> Arc<Self> {
        Self::with_id(EntityId::random())
    }

    /// Create an entity with the given id.
    pub fn with_id(id: EntityId) -> Arc<Self> {
        Arc::new_cyclic(|weak| Entity {
            id: RwLock::new(id),
            name: RwLock::new(String::new()),
            refs: AtomicUsize::new(0),
            shut_down: AtomicBool::new(false),
            components: Mutex::new(HashMap::new()),
            scope: tokio::sync::Mutex::new(()),
            weak_self: weak.clone(),
        })
    }

    /// Current id.
    pub fn id(&self) -> EntityId {
        self.id.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replace the id.
    pub fn set_id(&self, id: EntityId) {
        *self.id.write().unwrap_or_else(PoisonError::into_inner) = id;
    }

    /// Display name.
    pub fn name(&self) -> String {
        self.name
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the display name.
    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.write().unwrap_or_else(PoisonError::into_inner) = name.into();
    }

    /// Attach a component, replacing any existing component of the same type.
    ///
    /// A replaced component is shut down before the new one is initialized.
    pub fn add<C: Component>(&self, component: C) -> Arc<C> {
        self.add_arc(Arc::new(component))
    }

    /// Attach an already shared component.
    pub fn add_arc<C: Component>(&self, component: Arc<C>) -> Arc<C> {
        let slot = Slot {
            component: component.clone(),
            any: component.clone(),
        };
        let replaced = self.slots().insert(TypeId::of::<C>(), slot);

        if let Some(old) = replaced {
            old.component.shutdown();
        }
        component.init(&self.weak_self);
        self.changed();
        component
    }

    /// Look up a component by type.
    pub fn get<C: Component>(&self) -> Option<Arc<C>> {
        let any = self.slots().get(&TypeId::of::<C>())?.any.clone();
        any.downcast::<C>().ok()
    }

    /// Look up a component that must be present.
    pub fn require<C: Component>(&self) -> Result<Arc<C>, EntityError> {
        if self.is_shutdown() {
            return Err(EntityError::ShutDown(self.id().to_string()));
        }
        self.get::<C>().ok_or_else(|| EntityError::MissingComponent {
            entity: self.id().to_string(),
            component: short_type_name::<C>(),
        })
    }

    /// True when a component of this type is attached.
    pub fn has<C: Component>(&self) -> bool {
        self.slots().contains_key(&TypeId::of::<C>())
    }

    /// Shut down and detach a component.
    pub fn remove<C: Component>(&self) -> Option<Arc<C>> {
        let slot = self.slots().remove(&TypeId::of::<C>())?;
        slot.component.shutdown();
        self.changed();
        slot.any.downcast::<C>().ok()
    }

    /// Number of attached components.
    pub fn component_count(&self) -> usize {
        self.slots().len()
    }

    /// True while every component reports itself valid.
    pub fn valid(&self) -> bool {
        self.snapshot().iter().all(|c| c.valid())
    }

    /// Record activity on every component.
    pub fn update(&self) {
        for component in self.snapshot() {
            component.update();
        }
    }

    /// Take a reference. Returns the new count.
    pub fn acquire(&self) -> usize {
        self.refs.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drop a reference, shutting down when the count reaches zero.
    ///
    /// Releasing with no references held is ignored. Returns the new count.
    pub fn release(&self) -> usize {
        let previous = self
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match previous {
            Ok(1) => {
                self.shutdown();
                0
            }
            Ok(n) => n - 1,
            Err(_) => 0,
        }
    }

    /// Current reference count.
    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    /// Run every component's teardown.
    ///
    /// Only the first call has any effect; returns whether this call did the work.
    pub fn shutdown(&self) -> bool {
        if self
            .shut_down
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        tracing::debug!(entity = %self.id(), "entity shutdown");
        for component in self.snapshot() {
            component.shutdown();
        }
        true
    }

    /// True once [`Entity::shutdown`] has run.
    pub fn is_shutdown(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Enter the entity's exclusive scope for a read/modify/write sequence.
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.scope.lock().await
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<TypeId, Slot>> {
        self.components
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> Vec<Arc<dyn Component>> {
        self.slots().values().map(|s| s.component.clone()).collect()
    }

    fn changed(&self) {
        for component in self.snapshot() {
            component.on_entity_changed(self);
        }
    }
}

fn short_type_name<C>() -> &'static str {
    let full = std::any::type_name::<C>();
    full.rsplit("::").next().unwrap_or(full)
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("refs", &self.ref_count())
            .field("components", &self.component_count())
            .field("shut_down", &self.is_shutdown())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[derive(Default, Debug)]
    struct Counting {
        inits: AtomicU32,
        updates: AtomicU32,
        shutdowns: AtomicU32,
        changes: AtomicU32,
        invalid: AtomicBool,
    }

    impl Component for Counting {
        fn init(&self, _owner: &Weak<Entity>) {
            self.inits.fetch_add(1, Ordering::SeqCst);
        }
        fn update(&self) {
            self.updates.fetch_add(1, Ordering::SeqCst);
        }
        fn shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
        fn valid(&self) -> bool {
            !self.invalid.load(Ordering::SeqCst)
        }
        fn on_entity_changed(&self, _owner: &Entity) {
            self.changes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Label(&'static str);
    impl Component for Label {}

    // ===== Registry =====

    #[test]
    fn add_then_get_returns_typed_component() {
        let entity = Entity::new();
        entity.add(Label("hello"));
        assert_eq!(entity.get::<Label>().unwrap().0, "hello");
        assert!(entity.get::<Counting>().is_none());
    }

    #[test]
    fn add_calls_init_and_notifies() {
        let entity = Entity::new();
        let counter = entity.add(Counting::default());
        assert_eq!(counter.inits.load(Ordering::SeqCst), 1);
        assert_eq!(counter.changes.load(Ordering::SeqCst), 1);

        entity.add(Label("x"));
        assert_eq!(counter.changes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn add_replaces_same_kind_and_shuts_down_old() {
        let entity = Entity::new();
        let first = entity.add(Counting::default());
        let second = entity.add(Counting::default());

        assert_eq!(entity.component_count(), 1);
        assert_eq!(first.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(second.shutdowns.load(Ordering::SeqCst), 0);
        assert!(Arc::ptr_eq(&entity.get::<Counting>().unwrap(), &second));
    }

    #[test]
    fn remove_shuts_down_then_detaches() {
        let entity = Entity::new();
        let counter = entity.add(Counting::default());
        let removed = entity.remove::<Counting>().unwrap();

        assert!(Arc::ptr_eq(&removed, &counter));
        assert_eq!(counter.shutdowns.load(Ordering::SeqCst), 1);
        assert!(!entity.has::<Counting>());
        assert!(entity.remove::<Counting>().is_none());
    }

    #[test]
    fn valid_requires_every_component() {
        let entity = Entity::new();
        assert!(entity.valid());
        let counter = entity.add(Counting::default());
        entity.add(Label("ok"));
        assert!(entity.valid());
        counter.invalid.store(true, Ordering::SeqCst);
        assert!(!entity.valid());
    }

    #[test]
    fn update_reaches_every_component() {
        let entity = Entity::new();
        let counter = entity.add(Counting::default());
        entity.update();
        entity.update();
        assert_eq!(counter.updates.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn require_names_missing_component() {
        let entity = Entity::with_id(EntityId::new("e1"));
        entity.add(Label("x"));
        assert_eq!(entity.require::<Label>().unwrap().0, "x");
        assert_eq!(
            entity.require::<Counting>().unwrap_err(),
            EntityError::MissingComponent {
                entity: "e1".to_string(),
                component: "Counting",
            }
        );
        entity.shutdown();
        assert!(matches!(entity.require::<Label>(), Err(EntityError::ShutDown(_))));
    }

    #[test]
    fn id_and_name_are_mutable() {
        let entity = Entity::with_id(EntityId::new("one"));
        entity.set_id(EntityId::new("two"));
        entity.set_name("router");
        assert_eq!(entity.id(), EntityId::new("two"));
        assert_eq!(entity.name(), "router");
    }

    // ===== Reference counting =====

    #[test]
    fn release_shuts_down_exactly_once_on_last_reference() {
        let entity = Entity::new();
        let counter = entity.add(Counting::default());

        for _ in 0..5 {
            entity.acquire();
        }
        for remaining in (1..5).rev() {
            assert_eq!(entity.release(), remaining);
            assert_eq!(counter.shutdowns.load(Ordering::SeqCst), 0);
            assert!(!entity.is_shutdown());
        }
        assert_eq!(entity.release(), 0);
        assert_eq!(counter.shutdowns.load(Ordering::SeqCst), 1);
        assert!(entity.is_shutdown());
    }

    #[test]
    fn release_without_references_is_ignored() {
        let entity = Entity::new();
        let counter = entity.add(Counting::default());
        assert_eq!(entity.release(), 0);
        assert_eq!(entity.ref_count(), 0);
        assert_eq!(counter.shutdowns.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn shutdown_runs_once() {
        let entity = Entity::new();
        let counter = entity.add(Counting::default());
        assert!(entity.shutdown());
        assert!(!entity.shutdown());
        assert_eq!(counter.shutdowns.load(Ordering::SeqCst), 1);
    }

    // ===== Reentrancy =====

    struct Reentrant;
    impl Component for Reentrant {
        fn init(&self, owner: &Weak<Entity>) {
            if let Some(owner) = owner.upgrade() {
                owner.add(Label("added from init"));
            }
        }
    }

    #[test]
    fn hooks_may_call_back_into_owner() {
        let entity = Entity::new();
        entity.add(Reentrant);
        assert_eq!(entity.get::<Label>().unwrap().0, "added from init");
    }

    #[tokio::test]
    async fn scope_is_exclusive() {
        let entity = Entity::new();
        let guard = entity.lock().await;
        assert!(entity.scope.try_lock().is_err());
        drop(guard);
        assert!(entity.scope.try_lock().is_ok());
    }
}
