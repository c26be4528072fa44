use phalanx::{deserialize, register_component, register_component_with, serialize, SnapshotError, World};
use std::io::{Read, Write};

#[derive(Clone, Copy, Debug, PartialEq)]
struct Pos {
    x: f32,
    y: f32,
}
#[derive(Clone, Copy, Debug, PartialEq)]
struct Vel {
    dx: f32,
    dy: f32,
}
#[derive(Clone, Copy, Debug, PartialEq)]
struct Hp {
    hp: i32,
}

fn register_all() {
    register_component::<Pos>("Pos");
    register_component::<Vel>("Vel");
    register_component::<Hp>("Hp");
}

#[test]
fn round_trip_preserves_entities_and_slots() {
    register_all();

    let world = World::new();
    let e1 = world.create_with((Pos { x: 1.0, y: 2.0 }, Vel { dx: 3.0, dy: 4.0 }));
    let e2 = world.create_with((Pos { x: 5.0, y: 6.0 }, Hp { hp: 100 }));
    let e3 = world.create_with((Hp { hp: 50 },));
    world.destroy(e2);

    let mut buffer = Vec::new();
    serialize(&world, &mut buffer).unwrap();

    let restored = World::new();
    deserialize(&restored, &mut buffer.as_slice()).unwrap();

    assert_eq!(restored.len(), 2);
    assert!(restored.alive(e1));
    assert!(!restored.alive(e2));
    assert!(restored.alive(e3));
    assert_eq!(restored.get::<Pos>(e1).unwrap(), &Pos { x: 1.0, y: 2.0 });
    assert_eq!(restored.get::<Vel>(e1).unwrap(), &Vel { dx: 3.0, dy: 4.0 });
    assert_eq!(restored.get::<Hp>(e3).unwrap().hp, 50);

    // The free list came across: a fresh create reuses e2's slot with a
    // newer generation.
    let recycled = restored.create();
    assert_eq!(recycled.index(), e2.index());
    assert!(recycled.generation() > e2.generation());
}

#[test]
fn round_trip_of_empty_world() {
    let world = World::new();
    let mut buffer = Vec::new();
    serialize(&world, &mut buffer).unwrap();

    let restored = World::new();
    deserialize(&restored, &mut buffer.as_slice()).unwrap();
    assert_eq!(restored.len(), 0);

    // The restored world is fully usable.
    let entity = restored.create();
    assert!(restored.alive(entity));
}

#[test]
fn round_trip_preserves_archetype_membership() {
    register_all();

    let world = World::new();
    let entity = world.create_with((Pos { x: 0.0, y: 0.0 },));
    world.add(entity, Hp { hp: 1 });

    let mut buffer = Vec::new();
    serialize(&world, &mut buffer).unwrap();

    let restored = World::new();
    deserialize(&restored, &mut buffer.as_slice()).unwrap();

    assert!(restored.has::<Pos>(entity));
    assert!(restored.has::<Hp>(entity));
    assert!(!restored.has::<Vel>(entity));
    assert_eq!(restored.count::<(Pos, Hp)>(), 1);
}

#[test]
fn custom_serializer_round_trips() {
    register_component_with::<String, _, _>(
        "Name",
        |value: &String, out: &mut dyn Write| {
            let bytes = value.as_bytes();
            out.write_all(&(bytes.len() as u32).to_le_bytes())?;
            out.write_all(bytes)
        },
        |input: &mut dyn Read| {
            let mut len = [0u8; 4];
            input.read_exact(&mut len)?;
            let mut bytes = vec![0u8; u32::from_le_bytes(len) as usize];
            input.read_exact(&mut bytes)?;
            String::from_utf8(bytes)
                .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
        },
    );
    register_all();

    let world = World::new();
    let entity = world.create_with(("persistent name".to_string(), Hp { hp: 3 }));

    let mut buffer = Vec::new();
    serialize(&world, &mut buffer).unwrap();

    let restored = World::new();
    deserialize(&restored, &mut buffer.as_slice()).unwrap();
    assert_eq!(restored.get::<String>(entity).unwrap(), "persistent name");
    assert_eq!(restored.get::<Hp>(entity).unwrap().hp, 3);
}

#[test]
fn serialize_rejects_unregistered_types() {
    struct Unregistered(#[allow(dead_code)] u8);

    let world = World::new();
    world.create_with((Unregistered(1),));

    let mut buffer = Vec::new();
    assert!(matches!(
        serialize(&world, &mut buffer),
        Err(SnapshotError::UnregisteredType(_))
    ));
}

#[test]
fn deserialize_rejects_bad_magic() {
    let world = World::new();
    let bytes = b"NOPE\x01\x00\x00\x00";
    assert!(matches!(
        deserialize(&world, &mut bytes.as_slice()),
        Err(SnapshotError::BadMagic)
    ));
}

#[test]
fn deserialize_rejects_unknown_version() {
    let world = World::new();
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"ECS\0");
    bytes.extend_from_slice(&9u32.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.extend_from_slice(&1u32.to_le_bytes());
    assert!(matches!(
        deserialize(&world, &mut bytes.as_slice()),
        Err(SnapshotError::UnsupportedVersion(9))
    ));
}

#[test]
fn deserialize_rejects_non_empty_target() {
    register_all();

    let world = World::new();
    world.create_with((Pos { x: 0.0, y: 0.0 },));
    let mut buffer = Vec::new();
    serialize(&world, &mut buffer).unwrap();

    let target = World::new();
    target.create();
    assert!(matches!(
        deserialize(&target, &mut buffer.as_slice()),
        Err(SnapshotError::TargetNotEmpty)
    ));
}

#[test]
fn deserialize_rejects_unknown_component_names() {
    register_all();

    let world = World::new();
    world.create_with((Pos { x: 0.0, y: 0.0 },));
    let mut buffer = Vec::new();
    serialize(&world, &mut buffer).unwrap();

    // Corrupt the stored component name ("Pos" appears after the two
    // header counts and the per-archetype counts).
    let position = buffer
        .windows(3)
        .position(|window| window == b"Pos")
        .unwrap();
    buffer[position..position + 3].copy_from_slice(b"Zzz");

    let restored = World::new();
    assert!(matches!(
        deserialize(&restored, &mut buffer.as_slice()),
        Err(SnapshotError::UnknownComponentName(name)) if name == "Zzz"
    ));
}

#[test]
fn snapshot_excludes_resources_and_deferred_commands() {
    register_all();

    struct Counter(u32);

    let world = World::new();
    world.create_with((Pos { x: 1.0, y: 1.0 },));
    world.set_resource(Counter(7));
    world.deferred().create_with((Pos { x: 9.0, y: 9.0 },));

    let mut buffer = Vec::new();
    serialize(&world, &mut buffer).unwrap();

    let restored = World::new();
    deserialize(&restored, &mut buffer.as_slice()).unwrap();
    assert_eq!(restored.len(), 1);
    assert!(!restored.has_resource::<Counter>());

    // Flushing the restored world applies nothing.
    restored.flush_deferred();
    assert_eq!(restored.len(), 1);
}
