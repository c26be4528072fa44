//! Prefabs are reusable templates for spawning entities with preset
//! component defaults.
//!
//! A prefab stores copy-constructed default values in a flat, aligned
//! byte buffer together with per-component clone and drop functions. All
//! component types in a prefab must be clone-constructible. Instantiation
//! clones every default into a fresh entity whose archetype is exactly
//! the prefab's type set; see [`World::instantiate`](crate::World::instantiate)
//! and [`World::instantiate_with`](crate::World::instantiate_with).

use crate::{
    arena::{ByteArena, MAX_ALIGN},
    insert::{CloneBundle, CloneFn},
    storage::component::{Component, ComponentMeta, ComponentTypeId},
};

pub(crate) struct PrefabEntry {
    pub(crate) component: ComponentTypeId,
    pub(crate) meta: ComponentMeta,
    pub(crate) offset: usize,
    pub(crate) clone_fn: CloneFn,
}

/// A template for creating entities with a predefined set of components.
pub struct Prefab {
    entries: Vec<PrefabEntry>,
    buf: ByteArena,
}

impl Prefab {
    /// Creates a new prefab from a bundle of default component values.
    pub fn create<B: CloneBundle>(components: B) -> Self {
        let mut prefab = Self {
            entries: Vec::new(),
            buf: ByteArena::default(),
        };
        components.for_each_raw_with_clone(&mut |component, meta, clone_fn, src| {
            assert!(
                meta.align() <= MAX_ALIGN,
                "component alignment above {} is not supported in prefabs",
                MAX_ALIGN
            );
            let offset = prefab.buf.alloc(meta.size(), MAX_ALIGN);
            unsafe {
                std::ptr::copy_nonoverlapping(src, prefab.buf.at_mut(offset), meta.size());
            }
            prefab.entries.push(PrefabEntry {
                component,
                meta,
                offset,
                clone_fn,
            });
        });
        prefab
    }

    /// Returns `true` if the prefab contains a default for the given
    /// component type.
    pub fn has<T: Component>(&self) -> bool {
        let id = ComponentTypeId::of::<T>();
        self.entries.iter().any(|entry| entry.component == id)
    }

    /// Returns the number of component defaults stored in the prefab.
    pub fn component_count(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn entries(&self) -> &[PrefabEntry] {
        &self.entries
    }

    /// Returns a pointer to the stored default of `entry`.
    pub(crate) fn default_ptr(&self, entry: &PrefabEntry) -> *const u8 {
        // Safety: `offset` was produced by `alloc` during `create`.
        unsafe { self.buf.at(entry.offset) }
    }
}

impl Clone for Prefab {
    fn clone(&self) -> Self {
        let mut buf = ByteArena::default();
        let entries = self
            .entries
            .iter()
            .map(|entry| {
                // Replaying the allocation sequence reproduces the offsets.
                let offset = buf.alloc(entry.meta.size(), MAX_ALIGN);
                debug_assert_eq!(offset, entry.offset);
                unsafe {
                    (entry.clone_fn)(buf.at_mut(offset), self.buf.at(entry.offset));
                }
                PrefabEntry {
                    component: entry.component,
                    meta: entry.meta,
                    offset,
                    clone_fn: entry.clone_fn,
                }
            })
            .collect();
        Self { entries, buf }
    }
}

impl Drop for Prefab {
    fn drop(&mut self) {
        for entry in &self.entries {
            unsafe {
                entry.meta.drop(self.buf.base_ptr_mut().add(entry.offset));
            }
        }
    }
}

impl std::fmt::Debug for Prefab {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prefab")
            .field("components", &self.entries.len())
            .finish()
    }
}
