//! Queries select archetypes by component membership.
//!
//! A query is parameterised by an *include* tuple (every type must be
//! present) and an optional *exclude* tuple (no type may be present).
//! Matching happens entirely at the archetype level through presence
//! bitsets, and match lists are cached per term list, tagged with the
//! archetype-graph generation at which they were built.

use crate::storage::{
    archetype::{Archetype, ArchetypeIndex, ComponentBits},
    component::{Component, ComponentTypeId},
};
use smallvec::SmallVec;
use std::collections::HashMap;

/// The maximum number of include terms (and, separately, exclude terms)
/// in a single query.
pub const MAX_QUERY_TERMS: usize = 16;

/// A list of component type IDs used as query terms.
pub type TermList = SmallVec<[ComponentTypeId; MAX_QUERY_TERMS]>;

/// A statically-typed set of component types usable as query terms.
///
/// Implemented for `()` and for tuples of up to eight component types.
pub trait ComponentSet {
    /// Returns the component type IDs of this set, in declaration order.
    fn component_ids() -> TermList;
}

impl ComponentSet for () {
    fn component_ids() -> TermList {
        TermList::new()
    }
}

/// A tuple of component types which can be fetched from matching
/// archetypes during iteration.
pub trait Query: ComponentSet {
    /// Base column pointers for one archetype.
    type Ptrs: Copy;
    /// The references handed to the iteration callback.
    type Refs<'a>;

    /// Resolves the base pointers of every queried column.
    ///
    /// # Safety
    /// The archetype must contain every component type of the query.
    unsafe fn base_ptrs(archetype: &Archetype) -> Self::Ptrs;

    /// Produces references to the queried components at `row`.
    ///
    /// # Safety
    /// `row` must be a live row of the archetype the pointers were
    /// resolved from, and the caller must not create aliasing references
    /// to the same row.
    unsafe fn refs<'a>(ptrs: Self::Ptrs, row: usize) -> Self::Refs<'a>;
}

macro_rules! impl_query_tuple {
    ( $( $ty:ident ),* ) => {
        #[allow(non_snake_case)]
        impl<$( $ty: Component ),*> ComponentSet for ($( $ty, )*) {
            fn component_ids() -> TermList {
                let mut ids = TermList::new();
                $( ids.push(ComponentTypeId::of::<$ty>()); )*
                ids
            }
        }

        #[allow(non_snake_case)]
        impl<$( $ty: Component ),*> Query for ($( $ty, )*) {
            type Ptrs = ($( *mut $ty, )*);
            type Refs<'a> = ($( &'a mut $ty, )*);

            unsafe fn base_ptrs(archetype: &Archetype) -> Self::Ptrs {
                ($(
                    archetype
                        .column(ComponentTypeId::of::<$ty>())
                        .expect("matched archetype is missing a queried column")
                        .base_ptr() as *mut $ty,
                )*)
            }

            unsafe fn refs<'a>(ptrs: Self::Ptrs, row: usize) -> Self::Refs<'a> {
                let ($( $ty, )*) = ptrs;
                ($( &mut *$ty.add(row), )*)
            }
        }
    };
}

macro_rules! query_tuple {
    ($head_ty:ident) => {
        impl_query_tuple!($head_ty);
    };
    ($head_ty:ident, $( $tail_ty:ident ),*) => (
        impl_query_tuple!($head_ty, $( $tail_ty ),*);
        query_tuple!($( $tail_ty ),*);
    );
}

query_tuple!(A, B, C, D, E, F, G, H);

/// A fixed-capacity cache key for a query's include and exclude term
/// lists.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub(crate) struct QueryKey {
    include: [ComponentTypeId; MAX_QUERY_TERMS],
    exclude: [ComponentTypeId; MAX_QUERY_TERMS],
    n_include: u8,
    n_exclude: u8,
}

impl QueryKey {
    pub fn new(include: &[ComponentTypeId], exclude: &[ComponentTypeId]) -> Self {
        assert!(
            include.len() <= MAX_QUERY_TERMS,
            "query exceeds the maximum of {} include terms",
            MAX_QUERY_TERMS
        );
        assert!(
            exclude.len() <= MAX_QUERY_TERMS,
            "query exceeds the maximum of {} exclude terms",
            MAX_QUERY_TERMS
        );
        // Unused slots stay zeroed so derived equality and hashing only
        // see the live prefix.
        let mut key = Self {
            include: [ComponentTypeId(0); MAX_QUERY_TERMS],
            exclude: [ComponentTypeId(0); MAX_QUERY_TERMS],
            n_include: include.len() as u8,
            n_exclude: exclude.len() as u8,
        };
        key.include[..include.len()].copy_from_slice(include);
        key.exclude[..exclude.len()].copy_from_slice(exclude);
        key
    }

    fn masks(&self) -> (ComponentBits, ComponentBits) {
        let mut include = ComponentBits::default();
        for &id in &self.include[..self.n_include as usize] {
            include.set(id);
        }
        let mut exclude = ComponentBits::default();
        for &id in &self.exclude[..self.n_exclude as usize] {
            exclude.set(id);
        }
        (include, exclude)
    }
}

/// Returns `true` if an archetype's presence bits satisfy the query
/// masks.
pub(crate) fn archetype_matches(
    bits: &ComponentBits,
    include: &ComponentBits,
    exclude: &ComponentBits,
) -> bool {
    bits.contains_all(include) && !bits.intersects(exclude)
}

struct CacheEntry {
    archetypes: Vec<ArchetypeIndex>,
    generation: u64,
}

/// Maps query term lists to their matching archetypes.
///
/// Entries are rebuilt lazily whenever the archetype-graph generation has
/// moved past the generation they were built at.
#[derive(Default)]
pub(crate) struct QueryCache {
    entries: HashMap<QueryKey, CacheEntry>,
}

impl QueryCache {
    /// Returns the archetypes matching `key`, rebuilding the entry by a
    /// full scan when it is stale.
    pub fn matched(
        &mut self,
        key: QueryKey,
        generation: u64,
        archetypes: &[Archetype],
    ) -> &[ArchetypeIndex] {
        let entry = self.entries.entry(key).or_insert(CacheEntry {
            archetypes: Vec::new(),
            generation: u64::MAX,
        });
        if entry.generation != generation {
            let (include, exclude) = key.masks();
            entry.archetypes.clear();
            entry.archetypes.extend(
                archetypes
                    .iter()
                    .filter(|arch| archetype_matches(arch.bits(), &include, &exclude))
                    .map(|arch| arch.index()),
            );
            entry.generation = generation;
        }
        &entry.archetypes
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn key_equality_ignores_unused_slots() {
        let a = QueryKey::new(&[ComponentTypeId(1), ComponentTypeId(2)], &[]);
        let b = QueryKey::new(&[ComponentTypeId(1), ComponentTypeId(2)], &[]);
        let c = QueryKey::new(&[ComponentTypeId(1)], &[]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    #[should_panic(expected = "include terms")]
    fn too_many_terms_panics() {
        let ids: Vec<_> = (0..17).map(ComponentTypeId).collect();
        QueryKey::new(&ids, &[]);
    }
}
