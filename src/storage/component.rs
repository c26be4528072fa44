//! Contains types related to entity components and the process-wide
//! component type registry.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::{
    any::TypeId,
    collections::HashMap,
    fmt::{Display, Formatter},
    io::{self, Read, Write},
    sync::Arc,
};

/// The widest component type ID addressable by archetype presence bitsets
/// and query masks.
pub const MAX_COMPONENT_TYPES: usize = 256;

/// A marker trait for all types which can be attached to an entity.
///
/// This trait has a blanket impl for all applicable types.
pub trait Component: 'static + Sized + Send + Sync {}

impl<T: 'static + Sized + Send + Sync> Component for T {}

/// A unique ID for a component type.
///
/// IDs are dense `u32`s assigned in first-use order, so they are stable
/// within a process but not across processes, builds or link orders. Use
/// [`register_component`] to attach a stable name for snapshots.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ComponentTypeId(pub(crate) u32);

impl ComponentTypeId {
    /// Returns the component type ID for the given component type,
    /// assigning a fresh ID on first use.
    pub fn of<T: Component>() -> Self {
        let type_id = TypeId::of::<T>();
        if let Some(&id) = REGISTRY.read().by_type.get(&type_id) {
            return id;
        }
        let mut registry = REGISTRY.write();
        registry.intern::<T>(type_id)
    }

    /// Returns the dense numeric value of this ID.
    pub fn index(self) -> u32 {
        self.0
    }
}

impl Display for ComponentTypeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let registry = REGISTRY.read();
        match registry.infos.get(self.0 as usize) {
            Some(info) => write!(f, "{}", info.type_name),
            None => write!(f, "ComponentTypeId({})", self.0),
        }
    }
}

/// Contains information about the memory layout and drop glue of a
/// component type.
#[derive(Copy, Clone)]
pub struct ComponentMeta {
    size: usize,
    align: usize,
    drop_fn: Option<fn(*mut u8)>,
}

impl ComponentMeta {
    /// Returns the component meta of component type `T`.
    pub fn of<T: Component>() -> Self {
        ComponentMeta {
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
            drop_fn: if std::mem::needs_drop::<T>() {
                Some(|ptr| unsafe { std::ptr::drop_in_place(ptr as *mut T) })
            } else {
                None
            },
        }
    }

    /// Returns the size of the component.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the alignment of the component.
    pub fn align(&self) -> usize {
        self.align
    }

    /// Drops the component value behind `value`.
    ///
    /// # Safety
    /// The caller must ensure that `value` points to a live, properly
    /// aligned value of the component type and that the memory is not
    /// accessed again before it is re-initialized.
    pub unsafe fn drop(&self, value: *mut u8) {
        if let Some(drop_fn) = self.drop_fn {
            drop_fn(value)
        }
    }
}

impl std::fmt::Debug for ComponentMeta {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentMeta")
            .field("size", &self.size)
            .field("align", &self.align)
            .finish()
    }
}

/// Writes one component value to a byte sink.
pub(crate) type SerializeFn =
    Arc<dyn Fn(*const u8, &mut dyn Write) -> io::Result<()> + Send + Sync>;

/// Reads one component value from a byte source, constructing it in place.
pub(crate) type DeserializeFn =
    Arc<dyn Fn(*mut u8, &mut dyn Read) -> io::Result<()> + Send + Sync>;

/// Registry entry describing one component type.
#[derive(Clone)]
pub(crate) struct ComponentInfo {
    pub(crate) meta: ComponentMeta,
    pub(crate) type_name: &'static str,
    pub(crate) name: Option<String>,
    pub(crate) serialize: Option<SerializeFn>,
    pub(crate) deserialize: Option<DeserializeFn>,
}

#[derive(Default)]
struct TypeRegistry {
    by_type: HashMap<TypeId, ComponentTypeId>,
    by_name: HashMap<String, ComponentTypeId>,
    infos: Vec<ComponentInfo>,
}

impl TypeRegistry {
    fn intern<T: Component>(&mut self, type_id: TypeId) -> ComponentTypeId {
        // Re-check under the write lock; another thread may have interned
        // the type between our read and write.
        if let Some(&id) = self.by_type.get(&type_id) {
            return id;
        }
        assert!(
            self.infos.len() < MAX_COMPONENT_TYPES,
            "more than {} distinct component types",
            MAX_COMPONENT_TYPES
        );
        let id = ComponentTypeId(self.infos.len() as u32);
        self.by_type.insert(type_id, id);
        self.infos.push(ComponentInfo {
            meta: ComponentMeta::of::<T>(),
            type_name: std::any::type_name::<T>(),
            name: None,
            serialize: None,
            deserialize: None,
        });
        id
    }
}

static REGISTRY: Lazy<RwLock<TypeRegistry>> = Lazy::new(|| RwLock::new(TypeRegistry::default()));

fn bind_name(id: ComponentTypeId, name: &str, serialize: SerializeFn, deserialize: DeserializeFn) {
    let mut registry = REGISTRY.write();
    if let Some(&existing) = registry.by_name.get(name) {
        assert!(
            existing == id,
            "component name {:?} is already registered to a different type",
            name
        );
        return;
    }
    let info = &registry.infos[id.0 as usize];
    if let Some(existing) = &info.name {
        assert!(
            existing.as_str() == name,
            "component type {} is already registered as {:?}",
            info.type_name,
            existing
        );
        return;
    }
    registry.by_name.insert(name.to_owned(), id);
    let info = &mut registry.infos[id.0 as usize];
    info.name = Some(name.to_owned());
    info.serialize = Some(serialize);
    info.deserialize = Some(deserialize);
}

/// Registers a component type under a stable name for snapshots, using a
/// byte-copy serializer.
///
/// The `Copy` bound restricts the automatic serializer to types whose raw
/// bytes round-trip safely. Types owning heap data must go through
/// [`register_component_with`].
///
/// Registering the same `(type, name)` pair twice is a no-op; binding a
/// name to a second type, or a type to a second name, panics.
pub fn register_component<T: Component + Copy>(name: &str) {
    let id = ComponentTypeId::of::<T>();
    let size = std::mem::size_of::<T>();
    let serialize: SerializeFn = Arc::new(move |ptr, out| {
        let bytes = unsafe { std::slice::from_raw_parts(ptr as *const u8, size) };
        out.write_all(bytes)
    });
    let deserialize: DeserializeFn = Arc::new(move |dst, input| {
        let bytes = unsafe { std::slice::from_raw_parts_mut(dst, size) };
        input.read_exact(bytes)
    });
    bind_name(id, name, serialize, deserialize);
}

/// Registers a component type under a stable name with custom serialize
/// and deserialize functions.
pub fn register_component_with<T, S, D>(name: &str, serialize: S, deserialize: D)
where
    T: Component,
    S: Fn(&T, &mut dyn Write) -> io::Result<()> + Send + Sync + 'static,
    D: Fn(&mut dyn Read) -> io::Result<T> + Send + Sync + 'static,
{
    let id = ComponentTypeId::of::<T>();
    let serialize: SerializeFn =
        Arc::new(move |ptr, out| serialize(unsafe { &*(ptr as *const T) }, out));
    let deserialize: DeserializeFn = Arc::new(move |dst, input| {
        let value = deserialize(input)?;
        unsafe { std::ptr::write(dst as *mut T, value) };
        Ok(())
    });
    bind_name(id, name, serialize, deserialize);
}

/// Looks up a component type ID by its registered name.
pub fn component_id_by_name(name: &str) -> Option<ComponentTypeId> {
    REGISTRY.read().by_name.get(name).copied()
}

/// Looks up the registered name of a component type ID.
pub fn component_name(id: ComponentTypeId) -> Option<String> {
    REGISTRY
        .read()
        .infos
        .get(id.0 as usize)
        .and_then(|info| info.name.clone())
}

/// Returns `true` if the component type ID has a registered name.
pub fn component_registered(id: ComponentTypeId) -> bool {
    REGISTRY
        .read()
        .infos
        .get(id.0 as usize)
        .map(|info| info.name.is_some())
        .unwrap_or(false)
}

/// Returns a copy of the registry entry for the given ID.
///
/// Panics when the ID has never been interned; component type IDs only
/// originate from [`ComponentTypeId::of`], so this indicates a corrupted
/// snapshot or a logic error.
pub(crate) fn component_info(id: ComponentTypeId) -> ComponentInfo {
    REGISTRY.read().infos[id.0 as usize].clone()
}
