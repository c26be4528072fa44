//! Phalanx is an archetype-based entity component store for interactive
//! simulations.
//!
//! Entities are lightweight generational handles. Components are plain
//! Rust types attached to entities; entities with the same component set
//! are grouped into *archetypes*, which store each component type in its
//! own contiguous column inside a single chunk-allocated block. Queries
//! match archetypes through fixed-width presence bitsets and iterate rows
//! in tight loops over column base pointers.
//!
//! # Getting started
//!
//! ```rust
//! use phalanx::World;
//!
//! #[derive(Clone, Copy, Debug, PartialEq)]
//! struct Position { x: f32, y: f32 }
//! #[derive(Clone, Copy, Debug, PartialEq)]
//! struct Velocity { dx: f32, dy: f32 }
//!
//! let world = World::new();
//!
//! let entity = world.create_with((
//!     Position { x: 0.0, y: 0.0 },
//!     Velocity { dx: 1.0, dy: 2.0 },
//! ));
//!
//! world.each::<(Position, Velocity), _>(|_entity, (position, velocity)| {
//!     position.x += velocity.dx;
//!     position.y += velocity.dy;
//! });
//!
//! assert_eq!(world.get::<Position>(entity).unwrap().y, 2.0);
//! ```
//!
//! # Structural changes and iteration
//!
//! Structural mutation (creating or destroying entities, adding or
//! removing components, sorting, flushing, snapshots) is forbidden while
//! a query is running and panics if attempted. Queue changes through
//! [`World::deferred`] during iteration and apply them afterwards with
//! [`World::flush_deferred`], or record them into a standalone
//! [`CommandBuffer`].
//!
//! # Observers
//!
//! [`World::on_add`] and [`World::on_remove`] register typed hooks which
//! fire when a component lands on or leaves an entity. `on_remove` hooks
//! observe the value while it is still live.
//!
//! # Snapshots
//!
//! [`serialize`] writes every live entity, its components, slot
//! generations and the free list to a little-endian binary stream;
//! [`deserialize`] restores them into an empty world with identical
//! handles. Component types that should survive a snapshot must be given
//! stable names through [`register_component`] or
//! [`register_component_with`].
//!
//! # Feature flags
//!
//! * `strict-invariants` — keeps the internal parity assertions enabled
//!   outside of debug builds.

mod arena;
pub mod command;
pub mod entity;
mod event;
pub mod hash;
pub mod insert;
pub mod prefab;
pub mod query;
pub mod resources;
pub mod serialize;
pub mod storage;
pub mod world;

pub use command::{CommandBuffer, Deferred};
pub use entity::{Entity, EntityLocation};
pub use insert::{Bundle, CloneBundle};
pub use prefab::Prefab;
pub use query::{ComponentSet, Query, MAX_QUERY_TERMS};
pub use serialize::{deserialize, serialize, SnapshotError};
pub use storage::{
    component_id_by_name, component_name, component_registered, register_component,
    register_component_with, Archetype, ArchetypeIndex, Component, ComponentBits, ComponentTypeId,
    TypeSet, MAX_COMPONENT_TYPES,
};
pub use world::{ComponentError, World};
