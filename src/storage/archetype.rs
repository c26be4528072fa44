//! Archetypes are sets of entities which all contain exactly the same set
//! of component types.
//!
//! Entities in the same archetype have all of their components stored next
//! to each other and in the same order, allowing their components to be
//! accessed as zipped columns. All entity filtering happens at the
//! archetype level; decisions are never made per-entity.

use super::{
    column::Column,
    component::{component_info, ComponentTypeId, MAX_COMPONENT_TYPES},
};
use crate::{entity::Entity, hash::ComponentTypeIdHasher};
use smallvec::SmallVec;
use std::{
    alloc::{alloc, dealloc, handle_alloc_error, Layout},
    collections::HashMap,
    hash::BuildHasherDefault,
    ops::{Index, IndexMut},
    ptr::NonNull,
};

/// The index of an archetype in a world.
///
/// Archetypes are never destroyed while their world lives, so an index
/// obtained at any point stays valid until the world is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ArchetypeIndex(pub(crate) u32);

impl Index<ArchetypeIndex> for [Archetype] {
    type Output = Archetype;

    fn index(&self, index: ArchetypeIndex) -> &Self::Output {
        &self[index.0 as usize]
    }
}

impl IndexMut<ArchetypeIndex> for [Archetype] {
    fn index_mut(&mut self, index: ArchetypeIndex) -> &mut Self::Output {
        &mut self[index.0 as usize]
    }
}

impl Index<ArchetypeIndex> for Vec<Archetype> {
    type Output = Archetype;

    fn index(&self, index: ArchetypeIndex) -> &Self::Output {
        &self[index.0 as usize]
    }
}

impl IndexMut<ArchetypeIndex> for Vec<Archetype> {
    fn index_mut(&mut self, index: ArchetypeIndex) -> &mut Self::Output {
        &mut self[index.0 as usize]
    }
}

/// An ascending, duplicate-free sequence of component type IDs identifying
/// an archetype.
pub type TypeSet = SmallVec<[ComponentTypeId; 8]>;

/// Builds a canonical [`TypeSet`] from an arbitrary ID sequence.
pub(crate) fn make_type_set(ids: impl IntoIterator<Item = ComponentTypeId>) -> TypeSet {
    let mut set: TypeSet = ids.into_iter().collect();
    set.sort_unstable();
    debug_assert!(
        set.windows(2).all(|pair| pair[0] != pair[1]),
        "only one component of a given type may be attached to a single entity"
    );
    set
}

const BITS_PER_WORD: usize = 64;
const BIT_WORDS: usize = MAX_COMPONENT_TYPES / BITS_PER_WORD;

/// A fixed-width presence bitset over component type IDs.
///
/// Bit `c` is set iff component type `c` is a member of the owning
/// archetype's type set. Query matching is a pair of mask comparisons over
/// these words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ComponentBits([u64; BIT_WORDS]);

impl ComponentBits {
    pub(crate) fn set(&mut self, id: ComponentTypeId) {
        let bit = id.0 as usize;
        debug_assert!(bit < MAX_COMPONENT_TYPES);
        self.0[bit / BITS_PER_WORD] |= 1 << (bit % BITS_PER_WORD);
    }

    /// Returns `true` if the bit for `id` is set.
    pub fn contains(&self, id: ComponentTypeId) -> bool {
        let bit = id.0 as usize;
        bit < MAX_COMPONENT_TYPES && self.0[bit / BITS_PER_WORD] & (1 << (bit % BITS_PER_WORD)) != 0
    }

    /// Returns `true` if every bit set in `other` is also set in `self`.
    pub fn contains_all(&self, other: &ComponentBits) -> bool {
        self.0
            .iter()
            .zip(other.0.iter())
            .all(|(mine, theirs)| mine & theirs == *theirs)
    }

    /// Returns `true` if any bit is set in both `self` and `other`.
    pub fn intersects(&self, other: &ComponentBits) -> bool {
        self.0
            .iter()
            .zip(other.0.iter())
            .any(|(mine, theirs)| mine & theirs != 0)
    }
}

/// Memoised neighbour archetypes reached by adding or removing one
/// component type.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ArchetypeEdge {
    pub(crate) add: Option<ArchetypeIndex>,
    pub(crate) remove: Option<ArchetypeIndex>,
}

/// An archetype is a collection of entities which all have identical
/// component types.
///
/// Each archetype owns a single heap block backing all of its columns.
/// Every column shares the same row capacity, so one row index addresses
/// the same logical entity across columns.
pub struct Archetype {
    index: ArchetypeIndex,
    type_set: TypeSet,
    bits: ComponentBits,
    columns: Vec<(ComponentTypeId, Column)>,
    entities: Vec<Entity>,
    edges: HashMap<ComponentTypeId, ArchetypeEdge, BuildHasherDefault<ComponentTypeIdHasher>>,
    block: Option<(NonNull<u8>, Layout)>,
    capacity: usize,
}

impl Archetype {
    /// Padding alignment between columns within the backing block.
    pub const CHUNK_ALIGN: usize = 16;
    /// Byte budget used to size the initial capacity of a fresh block.
    const CHUNK_BYTES: usize = 16384;

    pub(crate) fn new(index: ArchetypeIndex, type_set: TypeSet) -> Self {
        debug_assert!(type_set.windows(2).all(|pair| pair[0] < pair[1]));
        let mut bits = ComponentBits::default();
        let mut columns = Vec::with_capacity(type_set.len());
        for &id in &type_set {
            bits.set(id);
            columns.push((id, Column::new(&component_info(id))));
        }
        Self {
            index,
            type_set,
            bits,
            columns,
            entities: Vec::new(),
            edges: HashMap::default(),
            block: None,
            capacity: 0,
        }
    }

    /// Returns the index of the archetype.
    pub fn index(&self) -> ArchetypeIndex {
        self.index
    }

    /// Returns the canonical component type set of the archetype.
    pub fn type_set(&self) -> &TypeSet {
        &self.type_set
    }

    /// Returns the presence bitset of the archetype.
    pub fn bits(&self) -> &ComponentBits {
        &self.bits
    }

    /// Returns the number of entities in the archetype.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` if the archetype contains no entities.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Returns a slice of entity IDs for all entities in the archetype,
    /// in row order.
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Returns `true` if the archetype stores the given component type.
    pub fn has_component(&self, id: ComponentTypeId) -> bool {
        self.bits.contains(id)
    }

    /// Returns the column for the given component type.
    pub fn column(&self, id: ComponentTypeId) -> Option<&Column> {
        self.columns
            .binary_search_by_key(&id, |(cid, _)| *cid)
            .ok()
            .map(|i| &self.columns[i].1)
    }

    pub(crate) fn column_mut(&mut self, id: ComponentTypeId) -> Option<&mut Column> {
        self.columns
            .binary_search_by_key(&id, |(cid, _)| *cid)
            .ok()
            .map(move |i| &mut self.columns[i].1)
    }

    pub(crate) fn columns(&self) -> &[(ComponentTypeId, Column)] {
        &self.columns
    }

    pub(crate) fn columns_mut(&mut self) -> &mut [(ComponentTypeId, Column)] {
        &mut self.columns
    }

    pub(crate) fn edge(&self, id: ComponentTypeId) -> ArchetypeEdge {
        self.edges.get(&id).copied().unwrap_or_default()
    }

    pub(crate) fn edge_mut(&mut self, id: ComponentTypeId) -> &mut ArchetypeEdge {
        self.edges.entry(id).or_default()
    }

    /// Total bytes per logical row across all columns.
    fn row_size(&self) -> usize {
        self.columns.iter().map(|(_, col)| col.elem_size()).sum()
    }

    /// Appends an entity row. The caller is responsible for having
    /// reserved column capacity and for subsequently filling every column.
    pub(crate) fn push_entity(&mut self, entity: Entity) {
        self.entities.push(entity);
    }

    pub(crate) fn entities_mut(&mut self) -> &mut Vec<Entity> {
        &mut self.entities
    }

    /// Removes the row at `row`, dropping every column value, and returns
    /// the entity that was moved into `row` to backfill it (if any).
    pub(crate) fn swap_remove(&mut self, row: usize) -> Option<Entity> {
        for (_, column) in &mut self.columns {
            // Safety: `row` is live; the length invariant ties column
            // counts to the entity vector.
            unsafe { column.swap_remove(row) };
        }
        self.swap_remove_entity(row)
    }

    /// Removes the row at `row` without dropping column values, treating
    /// them as already moved out. Returns the backfilled entity.
    pub(crate) fn swap_remove_forget(&mut self, row: usize) -> Option<Entity> {
        for (_, column) in &mut self.columns {
            unsafe { column.swap_remove_forget(row) };
        }
        self.swap_remove_entity(row)
    }

    fn swap_remove_entity(&mut self, row: usize) -> Option<Entity> {
        let last = self.entities.len() - 1;
        let swapped = (row < last).then(|| self.entities[last]);
        self.entities.swap_remove(row);
        self.assert_parity();
        swapped
    }

    /// Ensures the backing block can hold at least `needed` rows, growing
    /// and moving live rows if required.
    pub(crate) fn reserve(&mut self, needed: usize) {
        if self.capacity >= needed || self.columns.is_empty() {
            return;
        }

        let new_capacity = if self.capacity == 0 {
            let row_size = self.row_size();
            let by_budget = if row_size > 0 {
                Self::CHUNK_BYTES / row_size
            } else {
                64
            };
            by_budget.max(16)
        } else {
            self.capacity * 2
        }
        .max(needed);

        let (layout, offsets) = self.block_layout(new_capacity);
        let new_block = if layout.size() == 0 {
            None
        } else {
            let ptr = unsafe { alloc(layout) };
            match NonNull::new(ptr) {
                Some(ptr) => Some((ptr, layout)),
                None => handle_alloc_error(layout),
            }
        };

        for ((_, column), offset) in self.columns.iter_mut().zip(offsets) {
            let dst = match new_block {
                Some((base, _)) => unsafe { NonNull::new_unchecked(base.as_ptr().add(offset)) },
                // Zero-sized block: every column is zero-sized too. Use an
                // aligned dangling pointer.
                None => NonNull::new(column.elem_align() as *mut u8).unwrap(),
            };
            let live = column.len();
            if live > 0 {
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        column.base_ptr(),
                        dst.as_ptr(),
                        live * column.elem_size(),
                    )
                };
            }
            column.rebind(dst, new_capacity);
        }

        if let Some((old_ptr, old_layout)) = self.block.take() {
            unsafe { dealloc(old_ptr.as_ptr(), old_layout) };
        }
        self.block = new_block;
        self.capacity = new_capacity;
    }

    fn block_layout(&self, capacity: usize) -> (Layout, Vec<usize>) {
        let mut offset = 0usize;
        let mut max_align = Self::CHUNK_ALIGN;
        let mut offsets = Vec::with_capacity(self.columns.len());
        for (_, column) in &self.columns {
            let align = column.elem_align().max(Self::CHUNK_ALIGN);
            max_align = max_align.max(align);
            offset = align_up(offset, align);
            offsets.push(offset);
            offset += capacity * column.elem_size();
        }
        let layout = Layout::from_size_align(offset, max_align).expect("archetype block too large");
        (layout, offsets)
    }

    /// Checks the length invariant between the entity vector and every
    /// column.
    #[cfg(any(debug_assertions, feature = "strict-invariants"))]
    pub(crate) fn assert_parity(&self) {
        for (id, column) in &self.columns {
            assert!(
                column.len() == self.entities.len(),
                "entity-column parity violated for {}",
                id
            );
        }
    }

    #[cfg(not(any(debug_assertions, feature = "strict-invariants")))]
    pub(crate) fn assert_parity(&self) {}
}

impl Drop for Archetype {
    fn drop(&mut self) {
        for (_, column) in &mut self.columns {
            column.drop_all();
        }
        if let Some((ptr, layout)) = self.block.take() {
            unsafe { dealloc(ptr.as_ptr(), layout) };
        }
    }
}

impl std::fmt::Debug for Archetype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archetype")
            .field("index", &self.index)
            .field("type_set", &self.type_set)
            .field("entities", &self.entities.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) & !(align - 1)
}
