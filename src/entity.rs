use crate::hash::U64Hasher;
use crate::storage::{archetype::ArchetypeIndex, ComponentIndex};
use std::fmt::{Debug, Display};
use std::hash::{BuildHasherDefault, Hash, Hasher};

/// An opaque identifier for an entity.
///
/// An entity handle is a pair of a slot index and a generation count. The
/// generation is bumped every time a slot is released, so handles held
/// across a destroy cannot be confused with the slot's next occupant.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Entity {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl Entity {
    /// A handle which is never live. Slot 0 is reserved at world
    /// construction with generation 1 so that `(0, 0)` cannot resolve.
    pub const INVALID: Entity = Entity {
        index: 0,
        generation: 0,
    };

    /// Returns the slot index of this handle.
    pub fn index(self) -> u32 {
        self.index
    }

    /// Returns the generation of this handle.
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl Hash for Entity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64((self.index as u64) << 32 | self.generation as u64);
    }
}

impl Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Entity({}#{})", self.index, self.generation)
    }
}

impl Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.index, self.generation)
    }
}

/// A hasher optimized for entity handles.
pub type EntityHasher = BuildHasherDefault<U64Hasher>;

/// The storage location of an entity's data.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EntityLocation(pub(crate) ArchetypeIndex, pub(crate) ComponentIndex);

impl EntityLocation {
    /// Constructs a new entity location.
    pub fn new(archetype: ArchetypeIndex, component: ComponentIndex) -> Self {
        EntityLocation(archetype, component)
    }

    /// Returns the entity's archetype index.
    pub fn archetype(&self) -> ArchetypeIndex {
        self.0
    }

    /// Returns the entity's row within its archetype.
    pub fn component(&self) -> ComponentIndex {
        self.1
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Slot {
    pub(crate) generation: u32,
    pub(crate) location: Option<EntityLocation>,
}

/// The world's entity slot table.
///
/// Maps entity indices to generations and storage locations. Released
/// indices are recycled through a free list in LIFO order.
#[derive(Debug)]
pub(crate) struct SlotTable {
    pub(crate) slots: Vec<Slot>,
    pub(crate) free: Vec<u32>,
}

impl SlotTable {
    pub fn new() -> Self {
        // Slot 0 starts at generation 1 so Entity::INVALID is never live.
        Self {
            slots: vec![Slot {
                generation: 1,
                location: None,
            }],
            free: Vec::new(),
        }
    }

    /// Reserves a slot and returns a handle for it. The slot's location is
    /// unassigned until the caller places the entity into an archetype.
    pub fn allocate(&mut self) -> Entity {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    location: None,
                });
                index
            }
        };
        Entity {
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    /// Releases a slot, bumping its generation and recycling the index.
    pub fn release(&mut self, entity: Entity) {
        let slot = &mut self.slots[entity.index as usize];
        slot.location = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(entity.index);
    }

    /// Returns the location of a live entity.
    pub fn get(&self, entity: Entity) -> Option<EntityLocation> {
        let slot = self.slots.get(entity.index as usize)?;
        if slot.generation != entity.generation {
            return None;
        }
        slot.location
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.get(entity).is_some()
    }

    pub fn set_location(&mut self, index: u32, location: EntityLocation) {
        self.slots[index as usize].location = Some(location);
    }

    /// Updates only the row of an already-assigned location. Used for
    /// swap-remove fix-ups.
    pub fn set_row(&mut self, index: u32, row: ComponentIndex) {
        let slot = &mut self.slots[index as usize];
        debug_assert!(slot.location.is_some(), "row fix-up on unassigned slot");
        if let Some(location) = slot.location.as_mut() {
            location.1 = row;
        }
    }

    /// Returns the number of slots, live or free.
    pub fn len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reserved_zero_slot() {
        let table = SlotTable::new();
        assert_eq!(table.len(), 1);
        assert!(!table.is_alive(Entity::INVALID));
    }

    #[test]
    fn recycled_generation_increases() {
        let mut table = SlotTable::new();
        let first = table.allocate();
        table.release(first);
        let second = table.allocate();
        assert_eq!(first.index(), second.index());
        assert!(second.generation() > first.generation());
    }
}
