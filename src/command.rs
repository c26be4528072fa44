//! Contains types related to command buffers.
//!
//! Use command buffers to enqueue structural changes to a world while it
//! is being iterated. Commands are recorded into a linear byte buffer with
//! their component payloads stored inline, and are executed in recording
//! order when the buffer is flushed outside of iteration.

use crate::{
    arena::{align_up, ByteArena, MAX_ALIGN},
    entity::Entity,
    insert::Bundle,
    storage::component::{Component, ComponentMeta, ComponentTypeId},
    world::World,
};
use smallvec::SmallVec;
use std::mem;
use tracing::trace;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
enum CmdTag {
    Destroy,
    Add,
    Remove,
    CreateWith,
}

/// Fixed-size record header. `count` is the number of sub-entries for
/// `CreateWith`; `meta` describes the inline payload for `Add` and is a
/// zero-sized placeholder otherwise.
#[derive(Clone, Copy)]
#[repr(C)]
struct CmdHeader {
    tag: CmdTag,
    entity: Entity,
    component: ComponentTypeId,
    count: usize,
    meta: ComponentMeta,
}

#[derive(Clone, Copy)]
#[repr(C)]
struct SubEntry {
    component: ComponentTypeId,
    meta: ComponentMeta,
}

/// Records structural changes for later execution.
///
/// Commands are stored in a linear byte buffer and executed in FIFO order
/// when [`flush`](CommandBuffer::flush) is called. Component payloads are
/// moved into the buffer when recorded; payloads that are never flushed
/// (or whose target entity died before the flush reached them) are
/// dropped rather than leaked.
#[derive(Default)]
pub struct CommandBuffer {
    buf: ByteArena,
}

impl CommandBuffer {
    /// Constructs a new, empty command buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if no commands are queued.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Queues an entity for destruction.
    pub fn destroy(&mut self, entity: Entity) {
        self.write_header(CmdTag::Destroy, entity, ComponentTypeId(0), 0, unit_meta());
    }

    /// Queues a component addition, moving the value into the buffer.
    ///
    /// Follows the semantics of [`World::add`]: an overwrite when the
    /// component is already present, a migration otherwise, and a no-op
    /// (with the queued value dropped) when the entity is dead at flush
    /// time.
    pub fn add<T: Component>(&mut self, entity: Entity, component: T) {
        let meta = ComponentMeta::of::<T>();
        assert!(
            meta.align() <= MAX_ALIGN,
            "component alignment above {} is not supported in command buffers",
            MAX_ALIGN
        );
        self.write_header(CmdTag::Add, entity, ComponentTypeId::of::<T>(), 0, meta);
        let offset = self.buf.alloc(meta.size(), MAX_ALIGN);
        unsafe { std::ptr::write(self.buf.at_mut(offset) as *mut T, component) };
    }

    /// Queues a component removal.
    pub fn remove<T: Component>(&mut self, entity: Entity) {
        self.write_header(
            CmdTag::Remove,
            entity,
            ComponentTypeId::of::<T>(),
            0,
            unit_meta(),
        );
    }

    /// Queues the creation of a new entity with the given components.
    pub fn create_with<B: Bundle>(&mut self, components: B) {
        let count = B::type_set().len();
        self.write_header(
            CmdTag::CreateWith,
            Entity::INVALID,
            ComponentTypeId(0),
            count,
            unit_meta(),
        );
        components.for_each_raw(&mut |component, meta, src| {
            assert!(
                meta.align() <= MAX_ALIGN,
                "component alignment above {} is not supported in command buffers",
                MAX_ALIGN
            );
            let entry_offset = self
                .buf
                .alloc(mem::size_of::<SubEntry>(), mem::align_of::<SubEntry>());
            unsafe {
                std::ptr::write(
                    self.buf.at_mut(entry_offset) as *mut SubEntry,
                    SubEntry { component, meta },
                );
            }
            let data_offset = self.buf.alloc(meta.size(), MAX_ALIGN);
            unsafe {
                std::ptr::copy_nonoverlapping(src, self.buf.at_mut(data_offset), meta.size())
            };
        });
    }

    /// Executes all queued commands against `world`, in recording order.
    ///
    /// The buffer is taken by value before execution, so commands may
    /// safely enqueue further commands into this buffer while it flushes.
    pub fn flush(&mut self, world: &World) {
        if self.buf.is_empty() {
            return;
        }
        trace!(bytes = self.buf.len(), "flushing command buffer");
        let mut walker = RecordWalker::new(mem::take(&mut self.buf));
        while let Some(record) = walker.next_record() {
            match record {
                Record::Destroy(entity) => world.destroy(entity),
                Record::Add {
                    entity,
                    component,
                    meta,
                    data,
                } => {
                    let consumed = world.add_raw(entity, component, data);
                    if !consumed {
                        // Safety: the payload was moved into the buffer by
                        // `add` and was not consumed by the world.
                        unsafe { meta.drop(data) };
                    }
                }
                Record::Remove { entity, component } => world.remove_raw(entity, component),
                Record::CreateWith { entries } => {
                    world.create_with_raw(&entries);
                }
            }
        }
    }

    fn write_header(
        &mut self,
        tag: CmdTag,
        entity: Entity,
        component: ComponentTypeId,
        count: usize,
        meta: ComponentMeta,
    ) {
        let offset = self
            .buf
            .alloc(mem::size_of::<CmdHeader>(), mem::align_of::<CmdHeader>());
        unsafe {
            std::ptr::write(
                self.buf.at_mut(offset) as *mut CmdHeader,
                CmdHeader {
                    tag,
                    entity,
                    component,
                    count,
                    meta,
                },
            );
        }
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        // Walk any unflushed records so their payloads are dropped.
        drop(RecordWalker::new(mem::take(&mut self.buf)));
    }
}

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("bytes", &self.buf.len())
            .finish()
    }
}

pub(crate) type CreateEntry = (ComponentTypeId, ComponentMeta, *mut u8);

enum Record {
    Destroy(Entity),
    Add {
        entity: Entity,
        component: ComponentTypeId,
        meta: ComponentMeta,
        data: *mut u8,
    },
    Remove {
        entity: Entity,
        component: ComponentTypeId,
    },
    CreateWith {
        entries: SmallVec<[CreateEntry; 4]>,
    },
}

impl Record {
    fn drop_payloads(self) {
        match self {
            Record::Add { meta, data, .. } => unsafe { meta.drop(data) },
            Record::CreateWith { entries } => {
                for (_, meta, data) in entries {
                    unsafe { meta.drop(data) };
                }
            }
            _ => {}
        }
    }
}

/// Front-to-back cursor over a taken command byte buffer. Dropping the
/// walker drops the payloads of every record not yet yielded, which keeps
/// an aborted flush leak-free.
struct RecordWalker {
    arena: ByteArena,
    pos: usize,
}

impl RecordWalker {
    fn new(arena: ByteArena) -> Self {
        Self { arena, pos: 0 }
    }

    fn next_record(&mut self) -> Option<Record> {
        self.pos = align_up(self.pos, mem::align_of::<CmdHeader>());
        if self.pos + mem::size_of::<CmdHeader>() > self.arena.len() {
            return None;
        }
        // Safety: headers and payloads were written at exactly these
        // aligned offsets by the enqueue path.
        let header = unsafe { (self.arena.at(self.pos) as *const CmdHeader).read() };
        self.pos += mem::size_of::<CmdHeader>();

        match header.tag {
            CmdTag::Destroy => Some(Record::Destroy(header.entity)),
            CmdTag::Remove => Some(Record::Remove {
                entity: header.entity,
                component: header.component,
            }),
            CmdTag::Add => {
                self.pos = align_up(self.pos, MAX_ALIGN);
                let data = unsafe { self.arena.at(self.pos) as *mut u8 };
                self.pos += header.meta.size();
                Some(Record::Add {
                    entity: header.entity,
                    component: header.component,
                    meta: header.meta,
                    data,
                })
            }
            CmdTag::CreateWith => {
                let mut entries = SmallVec::new();
                for _ in 0..header.count {
                    self.pos = align_up(self.pos, mem::align_of::<SubEntry>());
                    let entry = unsafe { (self.arena.at(self.pos) as *const SubEntry).read() };
                    self.pos += mem::size_of::<SubEntry>();
                    self.pos = align_up(self.pos, MAX_ALIGN);
                    let data = unsafe { self.arena.at(self.pos) as *mut u8 };
                    self.pos += entry.meta.size();
                    entries.push((entry.component, entry.meta, data));
                }
                Some(Record::CreateWith { entries })
            }
        }
    }
}

impl Drop for RecordWalker {
    fn drop(&mut self) {
        while let Some(record) = self.next_record() {
            record.drop_payloads();
        }
    }
}

fn unit_meta() -> ComponentMeta {
    ComponentMeta::of::<()>()
}

/// A handle through which structural changes are queued onto a world's
/// internal deferred buffer, for execution by [`World::flush_deferred`].
pub struct Deferred<'a> {
    world: &'a World,
}

impl<'a> Deferred<'a> {
    pub(crate) fn new(world: &'a World) -> Self {
        Self { world }
    }

    /// Queues an entity for destruction.
    pub fn destroy(&self, entity: Entity) {
        self.world.deferred_buffer().destroy(entity);
    }

    /// Queues a component addition.
    pub fn add<T: Component>(&self, entity: Entity, component: T) {
        self.world.deferred_buffer().add(entity, component);
    }

    /// Queues a component removal.
    pub fn remove<T: Component>(&self, entity: Entity) {
        self.world.deferred_buffer().remove::<T>(entity);
    }

    /// Queues the creation of an entity with the given components.
    pub fn create_with<B: Bundle>(&self, components: B) {
        self.world.deferred_buffer().create_with(components);
    }
}
