//! The archetype storage layer: type-erased columns, chunk-allocated
//! archetype blocks, and the process-wide component type registry.

pub mod archetype;
pub mod column;
pub mod component;

pub use archetype::{Archetype, ArchetypeIndex, ComponentBits, TypeSet};
pub use column::Column;
pub use component::{
    component_id_by_name, component_name, component_registered, register_component,
    register_component_with, Component, ComponentMeta, ComponentTypeId, MAX_COMPONENT_TYPES,
};

/// The row index of an entity within an archetype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct ComponentIndex(pub(crate) usize);
