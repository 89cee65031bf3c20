//! Idle expiry.
//!
//! [`IdleComponent`] shuts its owner down once no activity has been recorded
//! for `timeout`. On shutdown it evicts the owner from every index it was
//! registered with, so an expired client disappears from the session, client
//! and group maps in one step.

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::entity::{Component, Entity};
use crate::index::EntityIndex;

#[derive(Default)]
struct IdleState {
    owner: Weak<Entity>,
    indexes: Vec<Weak<dyn EntityIndex>>,
    timer: Option<JoinHandle<()>>,
}

/// Expires its owner after a period without activity.
pub struct IdleComponent {
    timeout: Duration,
    last_activity: Arc<Mutex<Instant>>,
    state: Mutex<IdleState>,
}

impl IdleComponent {
    /// Expire after `timeout` without [`Component::update`].
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_activity: Arc::new(Mutex::new(Instant::now())),
            state: Mutex::new(IdleState::default()),
        }
    }

    /// Configured timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Time since the last recorded activity.
    pub fn idle_for(&self) -> Duration {
        self.last().elapsed()
    }

    /// Remember an index to evict the owner from on expiry.
    pub fn register(&self, index: Weak<dyn EntityIndex>) {
        let mut state = self.lock_state();
        if !state.indexes.iter().any(|i| i.ptr_eq(&index)) {
            state.indexes.push(index);
        }
    }

    /// Forget an index.
    pub fn deregister(&self, index: &Weak<dyn EntityIndex>) {
        self.lock_state().indexes.retain(|i| !i.ptr_eq(index));
    }

    /// Number of live registered indexes.
    pub fn index_count(&self) -> usize {
        self.lock_state()
            .indexes
            .iter()
            .filter(|i| i.strong_count() > 0)
            .count()
    }

    fn last(&self) -> Instant {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, IdleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Component for IdleComponent {
    fn init(&self, owner: &Weak<Entity>) {
        let mut state = self.lock_state();
        state.owner = owner.clone();

        // Without a runtime there is nothing to drive the timer; expiry then
        // only shows through `valid()`.
        if tokio::runtime::Handle::try_current().is_err() {
            return;
        }

        let timeout = self.timeout;
        let last_activity = self.last_activity.clone();
        let owner = owner.clone();
        let timer = tokio::spawn(async move {
            loop {
                let last = *last_activity.lock().unwrap_or_else(PoisonError::into_inner);
                let deadline = last + timeout;
                if Instant::now() >= deadline {
                    break;
                }
                tokio::time::sleep_until(deadline).await;
            }
            if let Some(entity) = owner.upgrade() {
                tracing::debug!(entity = %entity.id(), ?timeout, "idle expiry");
                entity.shutdown();
            }
        });

        if let Some(previous) = state.timer.replace(timer) {
            previous.abort();
        }
    }

    fn update(&self) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn shutdown(&self) {
        let (owner, indexes) = {
            let mut state = self.lock_state();
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            (state.owner.clone(), std::mem::take(&mut state.indexes))
        };

        let Some(owner) = owner.upgrade() else {
            return;
        };
        for index in indexes.iter().filter_map(Weak::upgrade) {
            index.evict(&owner);
        }
    }

    fn valid(&self) -> bool {
        self.idle_for() < self.timeout
    }
}

impl std::fmt::Debug for IdleComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdleComponent")
            .field("timeout", &self.timeout)
            .field("idle_for", &self.idle_for())
            .finish()
    }
}
