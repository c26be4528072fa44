//! Contains types related to the [World](struct.World.html) entity
//! collection.
//!
//! # Iteration safety
//!
//! The world's API takes `&self` throughout so that query callbacks and
//! observer hooks can reach back into the store. Exclusive access is
//! managed dynamically: every structural operation (create, destroy, add,
//! remove, sort, flush, snapshot) asserts that no iteration is in
//! progress, and iteration holds a depth counter for its duration. This
//! trades the borrow checker for a runtime discipline because column
//! pointers are type-erased; the counter is an integer so that nested
//! iteration keeps it positive until the outermost query exits.
//!
//! References returned by [`get`](World::get), [`try_get`](World::try_get)
//! and [`resource`](World::resource) are valid until the next structural
//! mutation (or resource overwrite/removal). Queries must not be nested
//! such that the same component type of the same entity is reachable
//! mutably from both levels, and an observer hook must not structurally
//! mutate the entity it is observing; both are documented contracts the
//! store does not enforce.

use crate::{
    command::{CommandBuffer, CreateEntry, Deferred},
    entity::{Entity, EntityLocation, SlotTable},
    event::{Hook, Observers},
    insert::Bundle,
    prefab::Prefab,
    query::{ComponentSet, Query, QueryCache, QueryKey},
    resources::Resources,
    storage::{
        archetype::{make_type_set, Archetype, ArchetypeIndex, TypeSet},
        component::{Component, ComponentTypeId},
        ComponentIndex,
    },
};
use itertools::Itertools;
use std::{
    cell::{Cell, UnsafeCell},
    cmp::Ordering,
    collections::HashMap,
    mem::ManuallyDrop,
    sync::Arc,
};
use thiserror::Error;
use tracing::debug;

/// An error type which describes why an attempt to retrieve a component
/// failed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentError {
    /// The entity handle does not refer to a live entity.
    #[error("entity {entity} is not alive")]
    Dead {
        /// The handle that failed to resolve.
        entity: Entity,
    },

    /// The entity is alive but does not have the requested component.
    #[error("the component {component_name} was not found on entity {entity}")]
    NotFound {
        /// The handle of the entity.
        entity: Entity,
        /// The type ID of the component.
        component_type: ComponentTypeId,
        /// The type name of the component.
        component_name: &'static str,
    },
}

/// The world's archetype graph: every archetype created so far, an index
/// from canonical type set to archetype, and the graph generation used to
/// invalidate query caches.
pub(crate) struct Archetypes {
    archetypes: Vec<Archetype>,
    index: HashMap<TypeSet, ArchetypeIndex>,
    generation: u64,
}

impl Archetypes {
    fn new() -> Self {
        Self {
            archetypes: Vec::new(),
            index: HashMap::new(),
            generation: 0,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.iter()
    }

    pub(crate) fn as_slice(&self) -> &[Archetype] {
        &self.archetypes
    }

    /// Returns the archetype for the given canonical type set, creating it
    /// (and bumping the graph generation) when it does not exist yet.
    pub(crate) fn get_or_create(&mut self, type_set: TypeSet) -> ArchetypeIndex {
        if let Some(&index) = self.index.get(&type_set) {
            return index;
        }
        let index = ArchetypeIndex(self.archetypes.len() as u32);
        debug!(index = index.0, types = ?type_set, "created archetype");
        self.archetypes.push(Archetype::new(index, type_set.clone()));
        self.index.insert(type_set, index);
        self.generation += 1;
        index
    }

    /// Returns the archetype reached from `src` by adding one component,
    /// memoising the edge.
    fn add_target(&mut self, src: ArchetypeIndex, id: ComponentTypeId) -> ArchetypeIndex {
        if let Some(target) = self.archetypes[src].edge(id).add {
            return target;
        }
        let type_set: TypeSet = self.archetypes[src]
            .type_set()
            .iter()
            .copied()
            .merge(std::iter::once(id))
            .collect();
        let target = self.get_or_create(type_set);
        self.archetypes[src].edge_mut(id).add = Some(target);
        target
    }

    /// Returns the archetype reached from `src` by removing one component,
    /// memoising the edge.
    fn remove_target(&mut self, src: ArchetypeIndex, id: ComponentTypeId) -> ArchetypeIndex {
        if let Some(target) = self.archetypes[src].edge(id).remove {
            return target;
        }
        let type_set: TypeSet = self.archetypes[src]
            .type_set()
            .iter()
            .copied()
            .filter(|&other| other != id)
            .collect();
        let target = self.get_or_create(type_set);
        self.archetypes[src].edge_mut(id).remove = Some(target);
        target
    }

    /// Mutably borrows two distinct archetypes at once.
    fn pair_mut(
        &mut self,
        a: ArchetypeIndex,
        b: ArchetypeIndex,
    ) -> (&mut Archetype, &mut Archetype) {
        assert_ne!(a, b);
        let (a, b) = (a.0 as usize, b.0 as usize);
        if a < b {
            let (head, tail) = self.archetypes.split_at_mut(b);
            (&mut head[a], &mut tail[0])
        } else {
            let (head, tail) = self.archetypes.split_at_mut(a);
            (&mut tail[0], &mut head[b])
        }
    }
}

impl std::ops::Index<ArchetypeIndex> for Archetypes {
    type Output = Archetype;

    fn index(&self, index: ArchetypeIndex) -> &Self::Output {
        &self.archetypes[index]
    }
}

impl std::ops::IndexMut<ArchetypeIndex> for Archetypes {
    fn index_mut(&mut self, index: ArchetypeIndex) -> &mut Self::Output {
        &mut self.archetypes[index]
    }
}

pub(crate) struct WorldInner {
    pub(crate) slots: SlotTable,
    pub(crate) archetypes: Archetypes,
    pub(crate) resources: Resources,
    pub(crate) observers: Observers,
    pub(crate) query_cache: QueryCache,
    pub(crate) deferred: CommandBuffer,
}

/// Decrements the iteration depth on every exit path, including panics.
struct IterationGuard<'a>(&'a Cell<u32>);

impl<'a> IterationGuard<'a> {
    fn enter(depth: &'a Cell<u32>) -> Self {
        depth.set(depth.get() + 1);
        Self(depth)
    }
}

impl Drop for IterationGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get() - 1);
    }
}

/// A container of entities.
///
/// Each entity stored inside a world is uniquely identified by an
/// [Entity](struct.Entity.html) handle and may have an arbitrary
/// collection of components attached. Entities with the same component
/// set live together in an [Archetype](struct.Archetype.html), which keeps
/// each component type in its own contiguous column.
///
/// A world additionally owns a typed resource table, per-component-type
/// observer lists, and a deferred command buffer for structural changes
/// queued during iteration.
pub struct World {
    inner: UnsafeCell<WorldInner>,
    iteration_depth: Cell<u32>,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// Constructs a new, empty world.
    pub fn new() -> Self {
        Self {
            inner: UnsafeCell::new(WorldInner {
                slots: SlotTable::new(),
                archetypes: Archetypes::new(),
                resources: Resources::default(),
                observers: Observers::default(),
                query_cache: QueryCache::default(),
                deferred: CommandBuffer::new(),
            }),
            iteration_depth: Cell::new(0),
        }
    }

    // The world is the only owner of its inner state and is neither `Send`
    // nor `Sync`, so these projections cannot race. Callers uphold the
    // no-overlap discipline described in the module docs: a `&mut
    // WorldInner` is never held across a user callback.
    pub(crate) fn inner(&self) -> &WorldInner {
        unsafe { &*self.inner.get() }
    }

    #[allow(clippy::mut_from_ref)]
    pub(crate) fn inner_mut(&self) -> &mut WorldInner {
        unsafe { &mut *self.inner.get() }
    }

    /// Asserts that no iteration is in progress. Every structural
    /// operation passes through here.
    pub(crate) fn guard_structural(&self, operation: &str) {
        assert!(
            self.iteration_depth.get() == 0,
            "structural change during iteration: {}",
            operation
        );
    }

    // -- entities --

    /// Creates a new entity with no components.
    ///
    /// The entity is placed into the empty archetype, so its handle
    /// resolves like any other and components can be added later.
    pub fn create(&self) -> Entity {
        self.guard_structural("create");
        let inner = self.inner_mut();
        let entity = inner.slots.allocate();
        let arch_index = inner.archetypes.get_or_create(TypeSet::new());
        let arch = &mut inner.archetypes[arch_index];
        let row = arch.len();
        arch.push_entity(entity);
        inner
            .slots
            .set_location(entity.index, EntityLocation::new(arch_index, ComponentIndex(row)));
        entity
    }

    /// Creates a new entity initialized with a bundle of components.
    ///
    /// Fires `on_add` for every component in the bundle, after the
    /// entity's location is set.
    pub fn create_with<B: Bundle>(&self, components: B) -> Entity {
        self.guard_structural("create_with");
        let type_set = B::type_set();
        let inner = self.inner_mut();
        let arch_index = inner.archetypes.get_or_create(type_set.clone());
        let entity = inner.slots.allocate();
        let row;
        {
            let arch = &mut inner.archetypes[arch_index];
            row = arch.len();
            arch.reserve(row + 1);
            arch.push_entity(entity);
            components.for_each_raw(&mut |id, _meta, src| {
                let column = arch
                    .column_mut(id)
                    .expect("bundle component missing from archetype");
                // Safety: capacity was reserved above; the bundle passes
                // ownership of the source bytes.
                unsafe { column.push_raw(src) };
            });
            arch.assert_parity();
        }
        inner
            .slots
            .set_location(entity.index, EntityLocation::new(arch_index, ComponentIndex(row)));
        for &id in &type_set {
            self.fire_on_add(id, entity);
        }
        entity
    }

    /// Type-erased entity creation used by command buffers.
    pub(crate) fn create_with_raw(&self, entries: &[CreateEntry]) -> Entity {
        self.guard_structural("create_with");
        let type_set = make_type_set(entries.iter().map(|(id, _, _)| *id));
        let inner = self.inner_mut();
        let arch_index = inner.archetypes.get_or_create(type_set);
        let entity = inner.slots.allocate();
        let row;
        {
            let arch = &mut inner.archetypes[arch_index];
            row = arch.len();
            arch.reserve(row + 1);
            arch.push_entity(entity);
            for (id, _meta, src) in entries {
                let column = arch
                    .column_mut(*id)
                    .expect("queued component missing from archetype");
                unsafe { column.push_raw(*src) };
            }
            arch.assert_parity();
        }
        inner
            .slots
            .set_location(entity.index, EntityLocation::new(arch_index, ComponentIndex(row)));
        for (id, _, _) in entries {
            self.fire_on_add(*id, entity);
        }
        entity
    }

    /// Destroys an entity and drops its components. Does nothing if the
    /// entity is already dead.
    ///
    /// Fires `on_remove` for every component on the entity, with the
    /// component values still live, before anything is torn down.
    pub fn destroy(&self, entity: Entity) {
        self.guard_structural("destroy");
        let Some(location) = self.inner().slots.get(entity) else {
            return;
        };
        let type_set = self.inner().archetypes[location.archetype()]
            .type_set()
            .clone();
        for &id in &type_set {
            self.fire_on_remove(id, entity);
        }

        let inner = self.inner_mut();
        // Hooks observed the entity; re-resolve in case one of them
        // misbehaved (documented as undefined, but kept memory-safe).
        let Some(location) = inner.slots.get(entity) else {
            return;
        };
        let row = location.component().0;
        let swapped = inner.archetypes[location.archetype()].swap_remove(row);
        if let Some(moved) = swapped {
            inner.slots.set_row(moved.index, ComponentIndex(row));
        }
        inner.slots.release(entity);
    }

    /// Destroys every entity that has component `T`, returning how many
    /// were destroyed.
    pub fn destroy_all_with<T: Component>(&self) -> u64 {
        self.guard_structural("destroy_all_with");
        let id = ComponentTypeId::of::<T>();
        let matches: Vec<ArchetypeIndex> = self
            .inner()
            .archetypes
            .iter()
            .filter(|arch| arch.has_component(id))
            .map(|arch| arch.index())
            .collect();

        let mut destroyed = 0u64;
        for arch_index in matches {
            // Drain back-to-front so no backfill moves are needed.
            loop {
                let Some(&entity) = self.inner().archetypes[arch_index].entities().last() else {
                    break;
                };
                let type_set = self.inner().archetypes[arch_index].type_set().clone();
                for &cid in &type_set {
                    self.fire_on_remove(cid, entity);
                }
                let inner = self.inner_mut();
                let Some(location) = inner.slots.get(entity) else {
                    continue;
                };
                let row = location.component().0;
                let swapped = inner.archetypes[arch_index].swap_remove(row);
                if let Some(moved) = swapped {
                    inner.slots.set_row(moved.index, ComponentIndex(row));
                }
                inner.slots.release(entity);
                destroyed += 1;
            }
        }
        destroyed
    }

    /// Returns `true` if the handle refers to a live entity.
    pub fn alive(&self, entity: Entity) -> bool {
        self.inner().slots.is_alive(entity)
    }

    /// Returns the number of live entities in the world.
    pub fn len(&self) -> usize {
        self.inner().archetypes.iter().map(|arch| arch.len()).sum()
    }

    /// Returns `true` if the world contains no entities.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // -- component access --

    /// Returns `true` if the entity is alive and has component `T`.
    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        match self.inner().slots.get(entity) {
            Some(location) => self.inner().archetypes[location.archetype()]
                .has_component(ComponentTypeId::of::<T>()),
            None => false,
        }
    }

    /// Returns a reference to the entity's `T` component.
    ///
    /// The reference is valid until the next structural mutation that
    /// touches the entity's archetype.
    pub fn get<T: Component>(&self, entity: Entity) -> Result<&T, ComponentError> {
        let location = self
            .inner()
            .slots
            .get(entity)
            .ok_or(ComponentError::Dead { entity })?;
        let component_type = ComponentTypeId::of::<T>();
        let arch = &self.inner().archetypes[location.archetype()];
        let column = arch.column(component_type).ok_or(ComponentError::NotFound {
            entity,
            component_type,
            component_name: std::any::type_name::<T>(),
        })?;
        // Safety: the location invariant guarantees the row is live, and
        // the column stores values of type T.
        Ok(unsafe { &*(column.get(location.component().0) as *const T) })
    }

    /// Returns a mutable reference to the entity's `T` component.
    ///
    /// Takes `&mut self`: exclusive access makes the reference sound
    /// without dynamic checks, at the cost of not being available inside
    /// queries or hooks (mutate through [`each`](World::each) there).
    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Result<&mut T, ComponentError> {
        let location = self
            .inner()
            .slots
            .get(entity)
            .ok_or(ComponentError::Dead { entity })?;
        let component_type = ComponentTypeId::of::<T>();
        let arch = &self.inner().archetypes[location.archetype()];
        let column = arch.column(component_type).ok_or(ComponentError::NotFound {
            entity,
            component_type,
            component_name: std::any::type_name::<T>(),
        })?;
        Ok(unsafe { &mut *(column.get(location.component().0) as *mut T) })
    }

    /// Returns a reference to the entity's `T` component, or `None` if the
    /// entity is dead or lacks the component.
    pub fn try_get<T: Component>(&self, entity: Entity) -> Option<&T> {
        self.get(entity).ok()
    }

    /// Adds a component to an entity, or overwrites the existing value.
    ///
    /// When the entity already has `T` the value is assigned in place and
    /// no observer fires; otherwise the entity migrates to the archetype
    /// with `T` added and `on_add` fires after the new row is in place.
    /// Does nothing if the entity is dead.
    pub fn add<T: Component>(&self, entity: Entity, component: T) {
        self.guard_structural("add");
        let Some(location) = self.inner().slots.get(entity) else {
            return;
        };
        let id = ComponentTypeId::of::<T>();
        if self.inner().archetypes[location.archetype()].has_component(id) {
            let inner = self.inner_mut();
            let arch = &mut inner.archetypes[location.archetype()];
            let column = arch.column_mut(id).expect("presence checked above");
            // Safety: the row is live and the column stores T values.
            // Assignment drops the previous value.
            unsafe { *(column.get(location.component().0) as *mut T) = component };
            return;
        }

        let mut value = ManuallyDrop::new(component);
        self.add_migrate(entity, id, &mut *value as *mut T as *mut u8);
    }

    /// Type-erased component addition used by command buffers. Returns
    /// `true` if the payload bytes were consumed.
    pub(crate) fn add_raw(&self, entity: Entity, id: ComponentTypeId, src: *mut u8) -> bool {
        self.guard_structural("add");
        let Some(location) = self.inner().slots.get(entity) else {
            return false;
        };
        if self.inner().archetypes[location.archetype()].has_component(id) {
            let inner = self.inner_mut();
            let arch = &mut inner.archetypes[location.archetype()];
            let column = arch.column_mut(id).expect("presence checked above");
            let row = location.component().0;
            // Safety: drop the current value, then move the payload in.
            unsafe {
                column.drop_in_place(row);
                std::ptr::copy_nonoverlapping(src, column.get(row), column.elem_size());
            }
            return true;
        }
        self.add_migrate(entity, id, src);
        true
    }

    fn add_migrate(&self, entity: Entity, id: ComponentTypeId, src: *mut u8) {
        {
            let inner = self.inner_mut();
            let location = inner.slots.get(entity).expect("liveness checked by caller");
            let src_index = location.archetype();
            let dst_index = inner.archetypes.add_target(src_index, id);
            Self::migrate_entity(
                inner,
                entity,
                src_index,
                dst_index,
                location.component().0,
                Some((id, src)),
            );
        }
        self.fire_on_add(id, entity);
    }

    /// Removes component `T` from an entity. Does nothing if the entity is
    /// dead or does not have the component.
    ///
    /// Fires `on_remove` with the value still live, then migrates the
    /// entity to the archetype without `T` and drops the value.
    pub fn remove<T: Component>(&self, entity: Entity) {
        self.remove_raw(entity, ComponentTypeId::of::<T>());
    }

    /// Type-erased component removal used by command buffers.
    pub(crate) fn remove_raw(&self, entity: Entity, id: ComponentTypeId) {
        self.guard_structural("remove");
        let Some(location) = self.inner().slots.get(entity) else {
            return;
        };
        if !self.inner().archetypes[location.archetype()].has_component(id) {
            return;
        }
        self.fire_on_remove(id, entity);

        let inner = self.inner_mut();
        // Re-resolve after hooks; see `destroy`.
        let Some(location) = inner.slots.get(entity) else {
            return;
        };
        let src_index = location.archetype();
        if !inner.archetypes[src_index].has_component(id) {
            return;
        }
        let row = location.component().0;
        let dst_index = inner.archetypes.remove_target(src_index, id);
        // The removed component is dropped here; the shared columns are
        // moved, not dropped, during migration.
        unsafe {
            inner.archetypes[src_index]
                .column_mut(id)
                .expect("presence checked above")
                .drop_in_place(row);
        }
        Self::migrate_entity(inner, entity, src_index, dst_index, row, None);
    }

    /// Moves an entity's row from `src_index` to `dst_index`.
    ///
    /// Shared columns are moved by byte copy; for an add migration the
    /// incoming component is appended into its column as the destination
    /// row is assembled. The source row is swap-removed without running
    /// destructors (its bytes have been moved out or dropped by the
    /// caller), and both the swapped entity's and the migrated entity's
    /// slots are fixed up.
    fn migrate_entity(
        inner: &mut WorldInner,
        entity: Entity,
        src_index: ArchetypeIndex,
        dst_index: ArchetypeIndex,
        src_row: usize,
        incoming: Option<(ComponentTypeId, *mut u8)>,
    ) {
        let dst_row;
        let swapped;
        {
            let (src, dst) = inner.archetypes.pair_mut(src_index, dst_index);
            dst_row = dst.len();
            dst.reserve(dst_row + 1);
            dst.push_entity(entity);
            for (id, dst_column) in dst.columns_mut() {
                if let Some((incoming_id, incoming_ptr)) = incoming {
                    if *id == incoming_id {
                        // Safety: capacity reserved; the caller passes
                        // ownership of the incoming bytes.
                        unsafe { dst_column.push_raw(incoming_ptr) };
                        continue;
                    }
                }
                let src_column = src
                    .column(*id)
                    .expect("destination column missing from source archetype");
                // Safety: the source row is live; its bytes are treated as
                // moved-from once copied.
                unsafe { dst_column.push_raw(src_column.get(src_row)) };
            }
            dst.assert_parity();
            swapped = src.swap_remove_forget(src_row);
        }
        if let Some(moved) = swapped {
            inner.slots.set_row(moved.index, ComponentIndex(src_row));
        }
        inner
            .slots
            .set_location(entity.index, EntityLocation::new(dst_index, ComponentIndex(dst_row)));
    }

    // -- queries --

    fn run_query<Q, F>(&self, exclude: &[ComponentTypeId], mut f: F)
    where
        Q: Query,
        F: FnMut(Entity, Q::Refs<'_>),
    {
        let include = Q::component_ids();
        let key = QueryKey::new(&include, exclude);
        let matches: Vec<ArchetypeIndex> = {
            let inner = self.inner_mut();
            let generation = inner.archetypes.generation();
            inner
                .query_cache
                .matched(key, generation, inner.archetypes.as_slice())
                .to_vec()
        };

        let _guard = IterationGuard::enter(&self.iteration_depth);
        for arch_index in matches {
            let arch = &self.inner().archetypes[arch_index];
            let len = arch.len();
            if len == 0 {
                continue;
            }
            let entities = arch.entities().as_ptr();
            // Safety: the cache only yields archetypes containing every
            // queried column.
            let ptrs = unsafe { Q::base_ptrs(arch) };
            for row in 0..len {
                // Raw pointers keep no borrow alive across the callback;
                // the iteration guard prevents the pointed-to storage from
                // moving underneath us.
                let entity = unsafe { *entities.add(row) };
                f(entity, unsafe { Q::refs(ptrs, row) });
            }
        }
    }

    /// Invokes `f` for every entity that has all components of `Q`, in
    /// ascending row order per archetype. Archetype visiting order is
    /// unspecified.
    ///
    /// Structural mutation from inside the callback panics; queue it
    /// through [`deferred`](World::deferred) instead. Nested queries are
    /// allowed as long as they do not reach the same component data
    /// mutably.
    pub fn each<Q, F>(&self, f: F)
    where
        Q: Query,
        F: FnMut(Entity, Q::Refs<'_>),
    {
        self.run_query::<Q, F>(&[], f);
    }

    /// Like [`each`](World::each), skipping archetypes that contain any
    /// component of the exclusion set `X`.
    pub fn each_without<Q, X, F>(&self, f: F)
    where
        Q: Query,
        X: ComponentSet,
        F: FnMut(Entity, Q::Refs<'_>),
    {
        let exclude = X::component_ids();
        self.run_query::<Q, F>(&exclude, f);
    }

    /// Invokes `f` for every matching entity without passing the entity
    /// handle.
    pub fn each_no_entity<Q, F>(&self, mut f: F)
    where
        Q: Query,
        F: FnMut(Q::Refs<'_>),
    {
        self.run_query::<Q, _>(&[], |_, refs| f(refs));
    }

    /// Like [`each_no_entity`](World::each_no_entity) with an exclusion
    /// set.
    pub fn each_no_entity_without<Q, X, F>(&self, mut f: F)
    where
        Q: Query,
        X: ComponentSet,
        F: FnMut(Q::Refs<'_>),
    {
        let exclude = X::component_ids();
        self.run_query::<Q, _>(&exclude, |_, refs| f(refs));
    }

    /// Returns the number of entities that have every component of `Q`.
    pub fn count<Q: ComponentSet>(&self) -> usize {
        let include = Q::component_ids();
        let key = QueryKey::new(&include, &[]);
        let inner = self.inner_mut();
        let generation = inner.archetypes.generation();
        inner
            .query_cache
            .matched(key, generation, inner.archetypes.as_slice())
            .iter()
            .map(|&index| inner.archetypes[index].len())
            .sum()
    }

    /// Invokes `f` on the unique entity matching `Q`.
    ///
    /// Panics when zero or more than one entity matches.
    pub fn single<Q, F>(&self, mut f: F)
    where
        Q: Query,
        F: FnMut(Entity, Q::Refs<'_>),
    {
        let mut found = 0u32;
        self.run_query::<Q, _>(&[], |entity, refs| {
            found += 1;
            assert!(found <= 1, "single matched more than one entity");
            f(entity, refs);
        });
        assert!(found == 1, "single matched zero entities");
    }

    // -- observers --

    /// Registers a callback fired whenever a component of type `T` lands
    /// on an entity: on creation with an initial set, on prefab
    /// instantiation, and on `add` migration. Overwriting an existing
    /// value does not fire.
    ///
    /// Hooks fire in registration order, after the entity's location is
    /// set, so `get::<T>` inside the hook observes the new value. A hook
    /// may mutate other entities; structurally mutating the observed
    /// entity is undefined.
    pub fn on_add<T, F>(&self, f: F)
    where
        T: Component,
        F: Fn(&World, Entity, &T) + 'static,
    {
        let hook: Hook = Arc::new(move |world, entity, ptr| {
            // Safety: fired only for component type T's ID.
            f(world, entity, unsafe { &*(ptr as *const T) })
        });
        self.inner_mut()
            .observers
            .push_on_add(ComponentTypeId::of::<T>(), hook);
    }

    /// Registers a callback fired whenever a component of type `T` is
    /// about to leave an entity: on `remove`, on `destroy`, and on
    /// [`destroy_all_with`](World::destroy_all_with). The value is still
    /// live during the callback and is dropped immediately after.
    pub fn on_remove<T, F>(&self, f: F)
    where
        T: Component,
        F: Fn(&World, Entity, &T) + 'static,
    {
        let hook: Hook = Arc::new(move |world, entity, ptr| {
            f(world, entity, unsafe { &*(ptr as *const T) })
        });
        self.inner_mut()
            .observers
            .push_on_remove(ComponentTypeId::of::<T>(), hook);
    }

    fn fire_on_add(&self, id: ComponentTypeId, entity: Entity) {
        let hooks = self.inner().observers.on_add_hooks(id);
        self.fire_hooks(&hooks, id, entity);
    }

    fn fire_on_remove(&self, id: ComponentTypeId, entity: Entity) {
        let hooks = self.inner().observers.on_remove_hooks(id);
        self.fire_hooks(&hooks, id, entity);
    }

    fn fire_hooks(&self, hooks: &[Hook], id: ComponentTypeId, entity: Entity) {
        for hook in hooks {
            // Re-resolve the value for every hook; an earlier hook may
            // have migrated other entities and grown the column.
            let Some(location) = self.inner().slots.get(entity) else {
                return;
            };
            let arch = &self.inner().archetypes[location.archetype()];
            let Some(column) = arch.column(id) else {
                return;
            };
            let ptr = unsafe { column.get(location.component().0) };
            (**hook)(self, entity, ptr);
        }
    }

    // -- resources --

    /// Inserts a store-global resource, dropping any previous value of the
    /// same type.
    pub fn set_resource<T: Component>(&self, value: T) {
        self.inner_mut()
            .resources
            .insert(ComponentTypeId::of::<T>(), Box::new(value));
    }

    /// Returns a reference to the `T` resource.
    ///
    /// Panics when the resource has not been set. The reference is valid
    /// until the resource is overwritten or removed.
    pub fn resource<T: Component>(&self) -> &T {
        self.try_resource::<T>().unwrap_or_else(|| {
            panic!("resource {} not found", std::any::type_name::<T>())
        })
    }

    /// Returns a mutable reference to the `T` resource.
    ///
    /// Panics when the resource has not been set.
    pub fn resource_mut<T: Component>(&mut self) -> &mut T {
        self.inner_mut()
            .resources
            .get_mut(ComponentTypeId::of::<T>())
            .unwrap_or_else(|| panic!("resource {} not found", std::any::type_name::<T>()))
    }

    /// Returns a reference to the `T` resource, or `None` when it has not
    /// been set.
    pub fn try_resource<T: Component>(&self) -> Option<&T> {
        self.inner().resources.get(ComponentTypeId::of::<T>())
    }

    /// Returns `true` if the `T` resource has been set.
    pub fn has_resource<T: Component>(&self) -> bool {
        self.inner().resources.contains(ComponentTypeId::of::<T>())
    }

    /// Removes and drops the `T` resource, if present.
    pub fn remove_resource<T: Component>(&self) {
        self.inner_mut().resources.remove(ComponentTypeId::of::<T>());
    }

    // -- deferred commands --

    /// Returns a handle for queuing structural changes onto the world's
    /// internal command buffer. This is the only structural mutation path
    /// that is legal during iteration.
    pub fn deferred(&self) -> Deferred<'_> {
        Deferred::new(self)
    }

    pub(crate) fn deferred_buffer(&self) -> &mut CommandBuffer {
        &mut self.inner_mut().deferred
    }

    /// Executes all queued deferred commands in recording order.
    ///
    /// The buffer is taken before execution, so commands (or observer
    /// hooks they trigger) may enqueue further deferred commands; those
    /// run at the next flush.
    pub fn flush_deferred(&self) {
        self.guard_structural("flush_deferred");
        let mut buffer = std::mem::take(&mut self.inner_mut().deferred);
        buffer.flush(self);
    }

    // -- sort --

    /// Sorts the rows of every archetype containing `T` by `cmp` applied
    /// to the `T` column.
    ///
    /// Entities and all component columns are permuted in lockstep and
    /// slot rows are fixed up afterwards, so handles keep resolving. The
    /// iteration counter is held for the duration: a comparator that
    /// attempts structural mutation panics.
    pub fn sort<T, F>(&self, mut cmp: F)
    where
        T: Component,
        F: FnMut(&T, &T) -> Ordering,
    {
        self.guard_structural("sort");
        let id = ComponentTypeId::of::<T>();
        let _guard = IterationGuard::enter(&self.iteration_depth);

        let matches: Vec<ArchetypeIndex> = self
            .inner()
            .archetypes
            .iter()
            .filter(|arch| arch.has_component(id))
            .map(|arch| arch.index())
            .collect();

        for arch_index in matches {
            let (len, base) = {
                let arch = &self.inner().archetypes[arch_index];
                (
                    arch.len(),
                    arch.column(id).expect("matched above").base_ptr() as *const T,
                )
            };
            if len <= 1 {
                continue;
            }

            // Sort an index vector (gather permutation), then invert it to
            // a scatter permutation and apply it by cycle-following swaps.
            let mut perm: Vec<usize> = (0..len).collect();
            perm.sort_by(|&a, &b| unsafe { cmp(&*base.add(a), &*base.add(b)) });
            let mut scatter = vec![0usize; len];
            for (dst, &src) in perm.iter().enumerate() {
                scatter[src] = dst;
            }

            {
                let arch = &mut self.inner_mut().archetypes[arch_index];
                for i in 0..len {
                    while scatter[i] != i {
                        let j = scatter[i];
                        arch.entities_mut().swap(i, j);
                        for (_, column) in arch.columns_mut() {
                            // Safety: i != j and both are live rows.
                            unsafe { column.swap_rows(i, j) };
                        }
                        scatter.swap(i, j);
                    }
                }
            }

            for row in 0..len {
                let entity = self.inner().archetypes[arch_index].entities()[row];
                self.inner_mut()
                    .slots
                    .set_row(entity.index, ComponentIndex(row));
            }
        }
    }

    // -- prefabs --

    /// Creates an entity from a prefab, cloning every stored default into
    /// place. The entity's archetype is exactly the prefab's type set.
    ///
    /// Fires `on_add` for every component placed.
    pub fn instantiate(&self, prefab: &Prefab) -> Entity {
        self.guard_structural("instantiate");
        assert!(
            prefab.component_count() > 0,
            "instantiate requires a non-empty prefab"
        );
        let type_set = make_type_set(prefab.entries().iter().map(|entry| entry.component));
        let inner = self.inner_mut();
        let arch_index = inner.archetypes.get_or_create(type_set.clone());
        let entity = inner.slots.allocate();
        let row;
        {
            let arch = &mut inner.archetypes[arch_index];
            row = arch.len();
            arch.reserve(row + 1);
            arch.push_entity(entity);
            for entry in prefab.entries() {
                let src = prefab.default_ptr(entry);
                let column = arch
                    .column_mut(entry.component)
                    .expect("prefab component missing from archetype");
                // Safety: capacity reserved; clone_fn fully initializes
                // the destination from the prefab default.
                unsafe { column.push_with(|dst| (entry.clone_fn)(dst, src)) };
            }
            arch.assert_parity();
        }
        inner
            .slots
            .set_location(entity.index, EntityLocation::new(arch_index, ComponentIndex(row)));
        for &id in &type_set {
            self.fire_on_add(id, entity);
        }
        entity
    }

    /// Creates an entity from a prefab with some components overridden.
    ///
    /// Components of `overrides` replace prefab defaults of the same type;
    /// override types absent from the prefab are appended, so the
    /// resulting archetype is the union of both type sets.
    pub fn instantiate_with<B: Bundle>(&self, prefab: &Prefab, overrides: B) -> Entity {
        self.guard_structural("instantiate");
        assert!(
            prefab.component_count() > 0,
            "instantiate requires a non-empty prefab"
        );
        let override_set = B::type_set();
        let type_set = make_type_set(
            prefab
                .entries()
                .iter()
                .map(|entry| entry.component)
                .chain(
                    override_set
                        .iter()
                        .copied()
                        .filter(|id| !prefab.entries().iter().any(|e| e.component == *id)),
                ),
        );
        let inner = self.inner_mut();
        let arch_index = inner.archetypes.get_or_create(type_set.clone());
        let entity = inner.slots.allocate();
        let row;
        {
            let arch = &mut inner.archetypes[arch_index];
            row = arch.len();
            arch.reserve(row + 1);
            arch.push_entity(entity);
            for entry in prefab.entries() {
                if override_set.contains(&entry.component) {
                    continue;
                }
                let src = prefab.default_ptr(entry);
                let column = arch
                    .column_mut(entry.component)
                    .expect("prefab component missing from archetype");
                unsafe { column.push_with(|dst| (entry.clone_fn)(dst, src)) };
            }
            overrides.for_each_raw(&mut |id, _meta, src| {
                let column = arch
                    .column_mut(id)
                    .expect("override component missing from archetype");
                unsafe { column.push_raw(src) };
            });
            arch.assert_parity();
        }
        inner
            .slots
            .set_location(entity.index, EntityLocation::new(arch_index, ComponentIndex(row)));
        for &id in &type_set {
            self.fire_on_add(id, entity);
        }
        entity
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("entities", &self.len())
            .field("archetypes", &self.inner().archetypes.as_slice().len())
            .field("iteration_depth", &self.iteration_depth.get())
            .finish()
    }
}
