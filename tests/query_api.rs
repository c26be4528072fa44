use phalanx::World;
use std::collections::HashSet;

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
struct A(u32);
#[derive(Clone, Copy, Debug, PartialEq)]
struct B(u32);
#[derive(Clone, Copy, Debug, PartialEq)]
struct C(u32);

#[test]
fn iteration_updates_components() {
    let world = World::new();
    for i in 0..100 {
        world.create_with((
            Pos { x: i as f32, y: 0.0 },
            Vel { dx: 1.0, dy: 2.0 },
        ));
    }
    // An entity without Vel must not be visited.
    world.create_with((Pos { x: -100.0, y: 0.0 },));

    world.each::<(Pos, Vel), _>(|_, (pos, vel)| {
        pos.x += vel.dx;
        pos.y += vel.dy;
    });

    let mut visited = 0;
    world.each::<(Pos, Vel), _>(|_, (pos, _)| {
        assert_eq!(pos.y, 2.0);
        visited += 1;
    });
    assert_eq!(visited, 100);
}

#[test]
fn each_no_entity_matches_each() {
    let world = World::new();
    world.create_with((A(1), B(10)));
    world.create_with((A(2), B(20)));

    let mut total = 0;
    world.each_no_entity::<(A, B), _>(|(a, b)| {
        total += a.0 + b.0;
    });
    assert_eq!(total, 33);
}

#[test]
fn empty_query_visits_nothing() {
    let world = World::new();
    world.create_with((A(1),));

    let mut visited = 0;
    world.each::<(B,), _>(|_, _| visited += 1);
    assert_eq!(visited, 0);
    assert_eq!(world.count::<(B,)>(), 0);
}

#[test]
fn exclude_filter() {
    let world = World::new();
    let ab = world.create_with((A(1), B(1)));
    world.create_with((A(2), C(2)));
    world.create_with((A(3), B(3), C(3)));

    let mut seen = Vec::new();
    world.each_without::<(A,), (C,), _>(|entity, (a,)| {
        seen.push((entity, a.0));
    });
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0], (ab, 1));
}

#[test]
fn exclude_no_entity() {
    let world = World::new();
    world.create_with((A(1), B(1)));
    world.create_with((A(2), C(2)));

    let mut sum = 0;
    world.each_no_entity_without::<(A,), (C,), _>(|(a,)| sum += a.0);
    assert_eq!(sum, 1);
}

#[test]
fn count_queries() {
    let world = World::new();
    world.create_with((A(1),));
    world.create_with((A(2), B(2)));
    world.create_with((A(3), B(3), C(3)));
    world.create_with((C(4),));

    assert_eq!(world.len(), 4);
    assert_eq!(world.count::<(A,)>(), 3);
    assert_eq!(world.count::<(A, B)>(), 2);
    assert_eq!(world.count::<(A, B, C)>(), 1);
    assert_eq!(world.count::<(C,)>(), 2);
}

#[test]
fn single_finds_the_unique_match() {
    let world = World::new();
    world.create_with((A(1),));
    let target = world.create_with((A(2), B(7)));

    let mut found = None;
    world.single::<(B,), _>(|entity, (b,)| {
        found = Some((entity, b.0));
    });
    assert_eq!(found, Some((target, 7)));
}

#[test]
#[should_panic(expected = "single matched zero entities")]
fn single_panics_on_zero() {
    let world = World::new();
    world.create_with((A(1),));
    world.single::<(B,), _>(|_, _| {});
}

#[test]
#[should_panic(expected = "single matched more than one entity")]
fn single_panics_on_many() {
    let world = World::new();
    world.create_with((A(1),));
    world.create_with((A(2),));
    world.single::<(A,), _>(|_, _| {});
}

#[test]
fn query_cache_sees_new_archetypes() {
    let world = World::new();
    world.create_with((A(1),));

    let mut visited = 0;
    world.each::<(A,), _>(|_, _| visited += 1);
    assert_eq!(visited, 1);

    // A new archetype containing A appears after the cache was built.
    world.create_with((A(2), B(2)));

    visited = 0;
    world.each::<(A,), _>(|_, _| visited += 1);
    assert_eq!(visited, 2);
}

#[test]
fn cached_query_matches_naive_scan() {
    let world = World::new();
    let mut with_a = HashSet::new();
    let mut with_a_not_c = HashSet::new();

    // Every subset of {A, B, C} over a pile of entities.
    for i in 0..64u32 {
        let has_a = i & 1 != 0;
        let has_b = i & 2 != 0;
        let has_c = i & 4 != 0;
        let entity = world.create();
        if has_a {
            world.add(entity, A(i));
        }
        if has_b {
            world.add(entity, B(i));
        }
        if has_c {
            world.add(entity, C(i));
        }
        if has_a {
            with_a.insert(entity);
            if !has_c {
                with_a_not_c.insert(entity);
            }
        }
    }

    let mut queried = HashSet::new();
    world.each::<(A,), _>(|entity, _| {
        queried.insert(entity);
    });
    assert_eq!(queried, with_a);

    let mut queried = HashSet::new();
    world.each_without::<(A,), (C,), _>(|entity, _| {
        queried.insert(entity);
    });
    assert_eq!(queried, with_a_not_c);
}

#[test]
fn rows_are_visited_in_ascending_order_per_archetype() {
    let world = World::new();
    for i in 0..50 {
        world.create_with((A(i),));
    }

    let mut last = None;
    world.each::<(A,), _>(|_, (a,)| {
        if let Some(previous) = last {
            assert!(a.0 > previous);
        }
        last = Some(a.0);
    });
    assert_eq!(last, Some(49));
}

#[test]
fn nested_iteration_is_allowed() {
    let world = World::new();
    world.create_with((A(1),));
    world.create_with((B(2),));

    let mut pairs = 0;
    world.each::<(A,), _>(|_, _| {
        world.each::<(B,), _>(|_, _| {
            pairs += 1;
        });
    });
    assert_eq!(pairs, 1);
}

#[test]
#[should_panic(expected = "structural change during iteration")]
fn structural_change_inside_nested_iteration_panics() {
    let world = World::new();
    world.create_with((A(1),));
    world.create_with((B(2),));

    world.each::<(A,), _>(|_, _| {
        world.each::<(B,), _>(|entity, _| {
            world.add(entity, C(3));
        });
    });
}

#[test]
fn queries_tolerate_empty_archetypes() {
    let world = World::new();
    let entity = world.create_with((A(1), B(1)));
    world.destroy(entity);

    // The (A, B) archetype still exists but holds no rows.
    let mut visited = 0;
    world.each::<(A,), _>(|_, _| visited += 1);
    assert_eq!(visited, 0);

    world.create_with((A(5), B(5)));
    visited = 0;
    world.each::<(A,), _>(|_, _| visited += 1);
    assert_eq!(visited, 1);
}
