//! Contains types related to store-global resources.
//!
//! Use resources to share persistent data between systems or to hold
//! state external to entities. A resource is keyed by its component type
//! ID; a type may serve as both a component and a resource without the
//! two colliding, because resources live in their own table.

use crate::{hash::ComponentTypeIdHasher, storage::component::ComponentTypeId};
use downcast_rs::{impl_downcast, Downcast};
use std::{collections::HashMap, hash::BuildHasherDefault};

/// Blanket trait for resource types.
pub trait Resource: 'static + Downcast {}
impl<T> Resource for T where T: 'static {}
impl_downcast!(Resource);

/// The typed resource table of a world.
#[derive(Default)]
pub(crate) struct Resources {
    storage: HashMap<ComponentTypeId, Box<dyn Resource>, BuildHasherDefault<ComponentTypeIdHasher>>,
}

impl Resources {
    /// Inserts a resource, dropping any previous value of the same type.
    pub fn insert(&mut self, id: ComponentTypeId, value: Box<dyn Resource>) {
        self.storage.insert(id, value);
    }

    pub fn get<T: Resource>(&self, id: ComponentTypeId) -> Option<&T> {
        self.storage.get(&id).and_then(|cell| cell.downcast_ref())
    }

    pub fn get_mut<T: Resource>(&mut self, id: ComponentTypeId) -> Option<&mut T> {
        self.storage
            .get_mut(&id)
            .and_then(|cell| cell.downcast_mut())
    }

    pub fn contains(&self, id: ComponentTypeId) -> bool {
        self.storage.contains_key(&id)
    }

    pub fn remove(&mut self, id: ComponentTypeId) -> bool {
        self.storage.remove(&id).is_some()
    }
}

impl std::fmt::Debug for Resources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.storage.keys()).finish()
    }
}
