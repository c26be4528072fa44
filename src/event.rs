//! Lifecycle observers.
//!
//! Worlds keep two ordered lists of typed callbacks per component type:
//! `on_add` hooks fire after a component value lands on an entity and its
//! slot is resolvable, `on_remove` hooks fire while the value is still
//! live, before its destructor runs. Hooks fire in registration order.

use crate::{
    entity::Entity,
    hash::ComponentTypeIdHasher,
    storage::component::ComponentTypeId,
    world::World,
};
use smallvec::SmallVec;
use std::{collections::HashMap, hash::BuildHasherDefault, sync::Arc};

/// A type-erased observer callback. The pointer refers to the observed
/// component value.
pub(crate) type Hook = Arc<dyn Fn(&World, Entity, *mut u8)>;

type HookMap = HashMap<ComponentTypeId, Vec<Hook>, BuildHasherDefault<ComponentTypeIdHasher>>;

/// Per-component-type observer tables.
#[derive(Default)]
pub(crate) struct Observers {
    on_add: HookMap,
    on_remove: HookMap,
}

impl Observers {
    pub fn push_on_add(&mut self, id: ComponentTypeId, hook: Hook) {
        self.on_add.entry(id).or_default().push(hook);
    }

    pub fn push_on_remove(&mut self, id: ComponentTypeId, hook: Hook) {
        self.on_remove.entry(id).or_default().push(hook);
    }

    /// Returns a snapshot of the `on_add` hooks for a component type.
    ///
    /// The snapshot decouples firing from the table itself, so hooks may
    /// register further observers without invalidating the iteration.
    pub fn on_add_hooks(&self, id: ComponentTypeId) -> SmallVec<[Hook; 4]> {
        Self::snapshot(&self.on_add, id)
    }

    /// Returns a snapshot of the `on_remove` hooks for a component type.
    pub fn on_remove_hooks(&self, id: ComponentTypeId) -> SmallVec<[Hook; 4]> {
        Self::snapshot(&self.on_remove, id)
    }

    fn snapshot(map: &HookMap, id: ComponentTypeId) -> SmallVec<[Hook; 4]> {
        map.get(&id)
            .map(|hooks| hooks.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("on_add", &self.on_add.len())
            .field("on_remove", &self.on_remove.len())
            .finish()
    }
}
