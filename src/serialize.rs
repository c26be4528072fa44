//! Binary world snapshots.
//!
//! A snapshot captures every live entity, its component values, archetype
//! membership, slot generations and the free list, in a little-endian
//! framed format. Component values are written through the serialize
//! functions attached at [`register_component`](crate::register_component)
//! time and matched back up by stable name on load, so snapshots survive
//! processes whose dense component type IDs were assigned in a different
//! order.
//!
//! Snapshots do not capture resources, observer registrations or pending
//! deferred commands.

use crate::{
    entity::{Entity, EntityLocation, Slot},
    storage::{
        archetype::make_type_set,
        component::{component_id_by_name, component_info, component_name, ComponentTypeId},
        ComponentIndex,
    },
    world::World,
};
use std::io::{Read, Write};
use thiserror::Error;
use tracing::debug;

const MAGIC: [u8; 4] = *b"ECS\0";
const VERSION: u32 = 1;

/// An error produced while writing or reading a world snapshot.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// The input does not begin with the snapshot magic.
    #[error("invalid snapshot magic")]
    BadMagic,

    /// The snapshot was written by an unsupported format version.
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u32),

    /// A component type in the world has no registered name/serializer.
    #[error("component type {0} is not registered for serialization")]
    UnregisteredType(String),

    /// A component name in the snapshot is not registered in this process.
    #[error("unknown component name {0:?} in snapshot")]
    UnknownComponentName(String),

    /// A component's serialized element size does not match the registered
    /// type.
    #[error("component {name:?} size mismatch: snapshot has {found}, registry has {expected}")]
    SizeMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    /// An entity or free-list index in the snapshot exceeds its declared
    /// slot count.
    #[error("snapshot entity index {0} is out of range")]
    InvalidEntityIndex(u32),

    /// The target world of a deserialize already contains entities.
    #[error("deserialize target world is not empty")]
    TargetNotEmpty,

    /// An underlying I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn write_u32(out: &mut dyn Write, value: u32) -> std::io::Result<()> {
    out.write_all(&value.to_le_bytes())
}

fn read_u32(input: &mut dyn Read) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Serializes the entire world state to a byte sink.
///
/// Every component type present on a live entity must have been registered
/// with a stable name (and therefore a serializer).
pub fn serialize(world: &World, out: &mut dyn Write) -> Result<(), SnapshotError> {
    world.guard_structural("serialize");
    let inner = world.inner();

    let occupied: Vec<_> = inner
        .archetypes
        .iter()
        .filter(|arch| !arch.is_empty())
        .collect();

    for arch in &occupied {
        for (id, column) in arch.columns() {
            if column.serialize.is_none() {
                return Err(SnapshotError::UnregisteredType(id.to_string()));
            }
        }
    }

    out.write_all(&MAGIC)?;
    write_u32(out, VERSION)?;
    write_u32(out, occupied.len() as u32)?;
    write_u32(out, inner.slots.len() as u32)?;

    for arch in &occupied {
        let entity_count = arch.len();
        write_u32(out, arch.columns().len() as u32)?;
        write_u32(out, entity_count as u32)?;

        for (id, column) in arch.columns() {
            let name = component_name(*id).expect("serializer present implies registered name");
            write_u32(out, name.len() as u32)?;
            out.write_all(name.as_bytes())?;
            write_u32(out, column.elem_size() as u32)?;
        }

        for (_, column) in arch.columns() {
            let serialize = column.serialize.as_ref().expect("validated above");
            for row in 0..entity_count {
                // Safety: rows 0..len are live.
                let ptr = unsafe { column.get(row) };
                (**serialize)(ptr, out)?;
            }
        }

        for entity in arch.entities() {
            write_u32(out, entity.index())?;
            write_u32(out, entity.generation())?;
        }
    }

    write_u32(out, inner.slots.len() as u32)?;
    for slot in &inner.slots.slots {
        write_u32(out, slot.generation)?;
    }
    write_u32(out, inner.slots.free.len() as u32)?;
    for &index in &inner.slots.free {
        write_u32(out, index)?;
    }

    debug!(
        archetypes = occupied.len(),
        entities = world.len(),
        "serialized world snapshot"
    );
    Ok(())
}

/// Restores world state from a byte source into an empty world.
///
/// Component columns are matched by registered name. On error the world is
/// safe to drop but its contents are unspecified.
pub fn deserialize(world: &World, input: &mut dyn Read) -> Result<(), SnapshotError> {
    world.guard_structural("deserialize");
    if world.len() != 0 {
        return Err(SnapshotError::TargetNotEmpty);
    }

    let mut magic = [0u8; 4];
    input.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(SnapshotError::BadMagic);
    }
    let version = read_u32(input)?;
    if version != VERSION {
        return Err(SnapshotError::UnsupportedVersion(version));
    }

    let archetype_count = read_u32(input)?;
    let slot_count_hint = read_u32(input)?;

    let inner = world.inner_mut();
    let mut restored_entities = 0usize;

    for _ in 0..archetype_count {
        let component_count = read_u32(input)? as usize;
        let entity_count = read_u32(input)? as usize;

        let mut metas: Vec<(ComponentTypeId, usize)> = Vec::with_capacity(component_count);
        for _ in 0..component_count {
            let name_len = read_u32(input)? as usize;
            let mut name = vec![0u8; name_len];
            input.read_exact(&mut name)?;
            let name = String::from_utf8(name).map_err(|err| {
                SnapshotError::UnknownComponentName(
                    String::from_utf8_lossy(err.as_bytes()).into_owned(),
                )
            })?;
            let elem_size = read_u32(input)? as usize;

            let id = component_id_by_name(&name)
                .ok_or_else(|| SnapshotError::UnknownComponentName(name.clone()))?;
            let registered = component_info(id);
            if registered.meta.size() != elem_size {
                return Err(SnapshotError::SizeMismatch {
                    name,
                    expected: registered.meta.size(),
                    found: elem_size,
                });
            }
            metas.push((id, elem_size));
        }

        let type_set = make_type_set(metas.iter().map(|(id, _)| *id));
        let arch_index = inner.archetypes.get_or_create(type_set);
        let arch = &mut inner.archetypes[arch_index];
        arch.reserve(entity_count);

        // Columns were written in the source archetype's canonical order,
        // which the metas list preserves.
        for (id, _) in &metas {
            let column = arch.column_mut(*id).expect("column created above");
            let deserialize = column
                .deserialize
                .clone()
                .expect("registered name implies deserializer");
            for row in 0..entity_count {
                // Safety: capacity was reserved for `entity_count` rows.
                let dst = unsafe { column.get(row) };
                (*deserialize)(dst, input)?;
                // Advance the live count row by row so a failed read still
                // leaves every constructed value owned by the column.
                column.set_len(row + 1);
            }
        }

        for _ in 0..entity_count {
            let index = read_u32(input)?;
            let generation = read_u32(input)?;
            if index >= slot_count_hint {
                return Err(SnapshotError::InvalidEntityIndex(index));
            }
            arch.push_entity(Entity { index, generation });
        }
        arch.assert_parity();
        restored_entities += entity_count;
    }

    let slot_count = read_u32(input)? as usize;
    let mut slots = Vec::with_capacity(slot_count);
    for _ in 0..slot_count {
        slots.push(Slot {
            generation: read_u32(input)?,
            location: None,
        });
    }
    inner.slots.slots = slots;

    let free_count = read_u32(input)? as usize;
    let mut free = Vec::with_capacity(free_count);
    for _ in 0..free_count {
        let index = read_u32(input)?;
        if index as usize >= slot_count {
            return Err(SnapshotError::InvalidEntityIndex(index));
        }
        free.push(index);
    }
    inner.slots.free = free;

    // Rebuild entity locations from the archetype row vectors.
    for arch in inner.archetypes.iter() {
        let index = arch.index();
        for (row, entity) in arch.entities().iter().enumerate() {
            let slot = inner
                .slots
                .slots
                .get_mut(entity.index() as usize)
                .ok_or(SnapshotError::InvalidEntityIndex(entity.index()))?;
            slot.location = Some(EntityLocation::new(index, ComponentIndex(row)));
        }
    }

    debug!(
        archetypes = archetype_count,
        entities = restored_entities,
        "deserialized world snapshot"
    );
    Ok(())
}
