use phalanx::{
    component_id_by_name, component_name, component_registered, register_component,
    ComponentTypeId,
};

#[derive(Clone, Copy)]
struct Stamina(#[allow(dead_code)] u32);
#[derive(Clone, Copy)]
struct Mana(#[allow(dead_code)] u32);
#[derive(Clone, Copy)]
struct Rage(#[allow(dead_code)] u32);
#[derive(Clone, Copy)]
struct Focus(#[allow(dead_code)] u32);

#[test]
fn register_and_look_up() {
    register_component::<Stamina>("registry_stamina");

    let id = ComponentTypeId::of::<Stamina>();
    assert_eq!(component_id_by_name("registry_stamina"), Some(id));
    assert_eq!(component_name(id).as_deref(), Some("registry_stamina"));
    assert!(component_registered(id));
}

#[test]
fn unregistered_types_have_no_name() {
    struct Anonymous;
    let id = ComponentTypeId::of::<Anonymous>();
    assert!(!component_registered(id));
    assert_eq!(component_name(id), None);
    assert_eq!(component_id_by_name("registry_never_used"), None);
}

#[test]
fn registration_is_idempotent() {
    register_component::<Mana>("registry_mana");
    register_component::<Mana>("registry_mana");
    assert_eq!(
        component_id_by_name("registry_mana"),
        Some(ComponentTypeId::of::<Mana>())
    );
}

#[test]
#[should_panic(expected = "already registered to a different type")]
fn name_cannot_bind_two_types() {
    register_component::<Rage>("registry_contested");
    register_component::<Focus>("registry_contested");
}

#[test]
#[should_panic(expected = "is already registered as")]
fn type_cannot_take_two_names() {
    #[derive(Clone, Copy)]
    struct Renamed;
    register_component::<Renamed>("registry_first_name");
    register_component::<Renamed>("registry_second_name");
}

#[test]
fn ids_are_dense_and_stable_within_a_run() {
    struct One;
    struct Two;
    let one = ComponentTypeId::of::<One>();
    let two = ComponentTypeId::of::<Two>();
    assert_ne!(one, two);
    assert_eq!(one, ComponentTypeId::of::<One>());
    assert_eq!(two, ComponentTypeId::of::<Two>());
}
