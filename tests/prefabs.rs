use phalanx::{Prefab, World};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Clone, Copy, Debug, PartialEq)]
struct Pos {
    x: f32,
    y: f32,
}
#[derive(Clone, Copy, Debug, PartialEq)]
struct Health {
    hp: i32,
}
#[derive(Clone, Copy, Debug, PartialEq)]
struct Armour(u32);

#[test]
fn prefab_reports_its_contents() {
    let prefab = Prefab::create((Pos { x: 0.0, y: 0.0 }, Health { hp: 100 }));
    assert_eq!(prefab.component_count(), 2);
    assert!(prefab.has::<Pos>());
    assert!(prefab.has::<Health>());
    assert!(!prefab.has::<Armour>());
}

#[test]
fn instantiate_clones_defaults() {
    let world = World::new();
    let prefab = Prefab::create((Pos { x: 1.0, y: 2.0 }, Health { hp: 100 }));

    let first = world.instantiate(&prefab);
    let second = world.instantiate(&prefab);

    assert_eq!(world.get::<Pos>(first).unwrap(), &Pos { x: 1.0, y: 2.0 });
    assert_eq!(world.get::<Health>(first).unwrap().hp, 100);
    assert_eq!(world.get::<Pos>(second).unwrap(), &Pos { x: 1.0, y: 2.0 });
    assert_eq!(world.count::<(Pos, Health)>(), 2);

    // Instances are independent copies.
    world.add(first, Pos { x: 9.0, y: 9.0 });
    assert_eq!(world.get::<Pos>(second).unwrap().x, 1.0);
}

#[test]
fn instantiate_with_override_replaces_default() {
    let world = World::new();
    let prefab = Prefab::create((Pos { x: 1.0, y: 2.0 }, Health { hp: 100 }));

    let entity = world.instantiate_with(&prefab, (Health { hp: 5 },));

    assert_eq!(world.get::<Health>(entity).unwrap().hp, 5);
    assert_eq!(world.get::<Pos>(entity).unwrap(), &Pos { x: 1.0, y: 2.0 });
    assert_eq!(world.count::<(Pos, Health)>(), 1);
}

#[test]
fn instantiate_with_appends_new_component_types() {
    let world = World::new();
    let prefab = Prefab::create((Pos { x: 1.0, y: 2.0 },));

    let entity = world.instantiate_with(&prefab, (Armour(3),));

    // The archetype is the union of prefab and override types.
    assert!(world.has::<Pos>(entity));
    assert!(world.has::<Armour>(entity));
    assert_eq!(world.get::<Armour>(entity).unwrap().0, 3);
    assert_eq!(world.count::<(Pos, Armour)>(), 1);
}

#[test]
fn instantiate_fires_on_add_for_every_component() {
    let world = World::new();
    let log = Rc::new(RefCell::new(Vec::new()));

    let pos_sink = log.clone();
    world.on_add::<Pos, _>(move |_, _, _| pos_sink.borrow_mut().push("pos"));
    let health_sink = log.clone();
    world.on_add::<Health, _>(move |_, _, _| health_sink.borrow_mut().push("health"));

    let prefab = Prefab::create((Pos { x: 0.0, y: 0.0 }, Health { hp: 1 }));
    world.instantiate(&prefab);

    let mut events = log.borrow().clone();
    events.sort();
    assert_eq!(events, vec!["health", "pos"]);
}

#[test]
fn heap_owning_defaults_clone_correctly() {
    let world = World::new();
    let prefab = Prefab::create(("template name".to_string(), Health { hp: 1 }));

    let first = world.instantiate(&prefab);
    let second = world.instantiate(&prefab);
    drop(prefab);

    assert_eq!(world.get::<String>(first).unwrap(), "template name");
    assert_eq!(world.get::<String>(second).unwrap(), "template name");
}

#[test]
fn prefab_clone_is_independent() {
    let prefab = Prefab::create(("original".to_string(),));
    let copy = prefab.clone();
    drop(prefab);

    let world = World::new();
    let entity = world.instantiate(&copy);
    assert_eq!(world.get::<String>(entity).unwrap(), "original");
}

#[test]
fn instantiated_entities_are_ordinary() {
    let world = World::new();
    let prefab = Prefab::create((Pos { x: 0.0, y: 0.0 },));

    let entity = world.instantiate(&prefab);
    world.add(entity, Health { hp: 10 });
    world.remove::<Pos>(entity);

    assert!(!world.has::<Pos>(entity));
    assert_eq!(world.get::<Health>(entity).unwrap().hp, 10);

    world.destroy(entity);
    assert!(!world.alive(entity));
}

#[test]
#[should_panic(expected = "structural change during iteration")]
fn instantiate_during_iteration_panics() {
    let world = World::new();
    let prefab = Prefab::create((Pos { x: 0.0, y: 0.0 },));
    world.instantiate(&prefab);

    world.each::<(Pos,), _>(|_, _| {
        world.instantiate(&prefab);
    });
}
