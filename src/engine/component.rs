//! Component registry: descriptors, validation, and world-local identity.
//!
//! Components are described at runtime by a name, byte layout, flag bits, and
//! optional lifecycle hooks; the registry assigns each accepted descriptor a
//! dense, strictly monotonic [`ComponentId`] starting at 1. Identity is
//! **world-local**: two worlds never share component ids, and a registered
//! component is never removed.
//!
//! ## Validation
//! - The name must be non-empty and unique (case-sensitive) within the world.
//! - A [`ComponentFlags::TAG`] component must declare size 0 and alignment
//!   0 or 1.
//! - Any other component must declare size ≥ 1 and a power-of-two alignment.
//!
//! ## Typed layer
//! [`ComponentDesc::of`] derives a descriptor from a Rust type: layout from
//! the type, a monomorphized drop hook when the type needs one, `TAG` for
//! zero-sized types, and `TRIVIALLY_RELOCATABLE` otherwise (Rust values move
//! bitwise). The erased core stays the single storage path; the typed layer
//! only builds descriptors and checks layouts at the API edge.

use std::ptr;

use crate::engine::error::{EcsError, EcsResult};
use crate::engine::types::{ComponentFlags, ComponentId};

/// Constructor hook: initialize `count` fresh values starting at `dst`.
pub type ComponentCtorFn = fn(dst: *mut u8, count: u32, user: *mut ());
/// Destructor hook: tear down `count` values starting at `dst`.
pub type ComponentDtorFn = fn(dst: *mut u8, count: u32, user: *mut ());
/// Move hook: relocate `count` values from `src` to `dst`, leaving the
/// source region dead.
pub type ComponentMoveFn = fn(dst: *mut u8, src: *const u8, count: u32, user: *mut ());

/// Descriptor submitted to [`register`](crate::World::register_component).
///
/// The descriptor is copied on registration; the registry keeps its own name
/// storage, so the caller's strings and buffers may be reused immediately.
#[derive(Clone)]
pub struct ComponentDesc {
    /// Stable component name, unique within one world.
    pub name: String,
    /// Value size in bytes; 0 only for tags.
    pub size: u32,
    /// Value alignment; power of two, or 0/1 for tags.
    pub align: u32,
    /// Property bits.
    pub flags: ComponentFlags,
    /// Optional constructor hook for values added without initial bytes.
    pub ctor: Option<ComponentCtorFn>,
    /// Optional destructor hook.
    pub dtor: Option<ComponentDtorFn>,
    /// Optional move hook consulted when values relocate between rows.
    pub move_fn: Option<ComponentMoveFn>,
    /// Opaque pointer forwarded to every hook.
    pub user: *mut (),
}

impl ComponentDesc {
    /// Creates a plain descriptor with no flags or hooks.
    pub fn new(name: &str, size: u32, align: u32) -> ComponentDesc {
        ComponentDesc {
            name: name.to_owned(),
            size,
            align,
            flags: ComponentFlags::NONE,
            ctor: None,
            dtor: None,
            move_fn: None,
            user: ptr::null_mut(),
        }
    }

    /// Creates a zero-size tag descriptor.
    pub fn tag(name: &str) -> ComponentDesc {
        let mut desc = ComponentDesc::new(name, 0, 1);
        desc.flags = ComponentFlags::TAG;
        desc
    }

    /// Derives a descriptor from a Rust type.
    ///
    /// Zero-sized types become tags. Other types carry their Rust layout, a
    /// drop hook when one is needed, and `TRIVIALLY_RELOCATABLE` since Rust
    /// values relocate bitwise.
    pub fn of<T: 'static + Send + Sync>(name: &str) -> ComponentDesc {
        if core::mem::size_of::<T>() == 0 {
            return ComponentDesc::tag(name);
        }

        let mut desc = ComponentDesc::new(
            name,
            core::mem::size_of::<T>() as u32,
            core::mem::align_of::<T>() as u32,
        );
        desc.flags = ComponentFlags::TRIVIALLY_RELOCATABLE;
        if core::mem::needs_drop::<T>() {
            desc.dtor = Some(drop_values::<T>);
        }
        desc
    }

    /// Returns a copy of this descriptor with the given flags.
    pub fn with_flags(mut self, flags: ComponentFlags) -> ComponentDesc {
        self.flags = flags;
        self
    }

    /// Returns a copy of this descriptor with a constructor hook.
    pub fn with_ctor(mut self, ctor: ComponentCtorFn) -> ComponentDesc {
        self.ctor = Some(ctor);
        self
    }

    /// Returns a copy of this descriptor with a destructor hook.
    pub fn with_dtor(mut self, dtor: ComponentDtorFn) -> ComponentDesc {
        self.dtor = Some(dtor);
        self
    }

    /// Returns a copy of this descriptor with a move hook.
    pub fn with_move(mut self, move_fn: ComponentMoveFn) -> ComponentDesc {
        self.move_fn = Some(move_fn);
        self
    }

    /// Returns a copy of this descriptor with hook user data.
    pub fn with_user(mut self, user: *mut ()) -> ComponentDesc {
        self.user = user;
        self
    }
}

fn drop_values<T>(dst: *mut u8, count: u32, _user: *mut ()) {
    let ptr = dst as *mut T;
    for i in 0..count as usize {
        // SAFETY: the engine only invokes the hook on initialized rows.
        unsafe { ptr::drop_in_place(ptr.add(i)) };
    }
}

/// Registered component metadata.
pub(crate) struct ComponentRecord {
    pub(crate) name: String,
    pub(crate) size: u32,
    pub(crate) align: u32,
    pub(crate) flags: ComponentFlags,
    pub(crate) ctor: Option<ComponentCtorFn>,
    pub(crate) dtor: Option<ComponentDtorFn>,
    pub(crate) move_fn: Option<ComponentMoveFn>,
    pub(crate) user: *mut (),
}

impl ComponentRecord {
    /// Writes one freshly added value at `dst` from initial bytes, the
    /// constructor hook, or zero fill, in that priority order.
    ///
    /// No-op for tags and empty components.
    pub(crate) fn construct_into(&self, dst: *mut u8, initial: Option<&[u8]>) {
        if self.size == 0 || dst.is_null() {
            return;
        }

        match initial {
            Some(bytes) => {
                debug_assert_eq!(bytes.len(), self.size as usize);
                // SAFETY: dst addresses one uninitialized value of this
                // component's size; bytes were validated at the API edge.
                unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), dst, self.size as usize) };
            }
            None => {
                if let Some(ctor) = self.ctor {
                    ctor(dst, 1, self.user);
                } else {
                    // SAFETY: dst addresses `size` writable bytes.
                    unsafe { ptr::write_bytes(dst, 0, self.size as usize) };
                }
            }
        }
    }

    /// Relocates one value from `src` to `dst`.
    ///
    /// The move hook is consulted unless the component is trivially
    /// relocatable; without a hook the bytes are copied verbatim. The source
    /// region is dead afterwards.
    pub(crate) fn transfer(&self, dst: *mut u8, src: *const u8) {
        if self.size == 0 || dst.is_null() || src.is_null() || ptr::eq(dst, src as *mut u8) {
            return;
        }

        match self.move_fn {
            Some(move_fn) if !self.flags.contains(ComponentFlags::TRIVIALLY_RELOCATABLE) => {
                move_fn(dst, src, 1, self.user);
            }
            _ => {
                // SAFETY: dst and src address distinct rows of this
                // component's size.
                unsafe { ptr::copy_nonoverlapping(src, dst, self.size as usize) };
            }
        }
    }

    /// Runs the destructor hook on one value, if any.
    pub(crate) fn destruct(&self, dst: *mut u8) {
        if self.size == 0 || dst.is_null() {
            return;
        }
        if let Some(dtor) = self.dtor {
            dtor(dst, 1, self.user);
        }
    }
}

/// World-local table of registered components, indexed by dense 1-based ids.
pub(crate) struct ComponentRegistry {
    records: Vec<ComponentRecord>,
}

impl ComponentRegistry {
    pub(crate) fn new() -> ComponentRegistry {
        ComponentRegistry {
            records: Vec::new(),
        }
    }

    pub(crate) fn reserve(&mut self, capacity: u32) {
        let target = capacity as usize;
        if target > self.records.len() {
            self.records.reserve(target - self.records.len());
        }
    }

    /// Number of registered components; also the highest valid id.
    pub(crate) fn len(&self) -> u32 {
        self.records.len() as u32
    }

    /// Returns `true` if `id` names a registered component.
    pub(crate) fn contains(&self, id: ComponentId) -> bool {
        id.is_valid() && (id.0 as usize) <= self.records.len()
    }

    /// Validates and registers a descriptor, assigning the next dense id.
    pub(crate) fn register(&mut self, desc: &ComponentDesc) -> EcsResult<ComponentId> {
        validate_desc(desc)?;

        if self.records.iter().any(|record| record.name == desc.name) {
            return Err(EcsError::AlreadyExists);
        }

        if self.records.len() as u64 >= (u32::MAX - 1) as u64 {
            return Err(EcsError::CapacityReached);
        }

        self.records.push(ComponentRecord {
            name: desc.name.clone(),
            size: desc.size,
            align: if desc.align == 0 { 1 } else { desc.align },
            flags: desc.flags,
            ctor: desc.ctor,
            dtor: desc.dtor,
            move_fn: desc.move_fn,
            user: desc.user,
        });

        Ok(ComponentId(self.records.len() as u32))
    }

    /// Case-sensitive lookup by name.
    pub(crate) fn find_by_name(&self, name: &str) -> EcsResult<ComponentId> {
        self.records
            .iter()
            .position(|record| record.name == name)
            .map(|index| ComponentId(index as u32 + 1))
            .ok_or(EcsError::NotFound)
    }

    /// Record access for a validated id.
    ///
    /// ## Invariants
    /// Callers pass ids already checked with [`contains`](Self::contains).
    pub(crate) fn record(&self, id: ComponentId) -> &ComponentRecord {
        &self.records[id.table_index()]
    }

    pub(crate) fn get(&self, id: ComponentId) -> EcsResult<&ComponentRecord> {
        if !self.contains(id) {
            return Err(EcsError::NotFound);
        }
        Ok(self.record(id))
    }
}

fn validate_desc(desc: &ComponentDesc) -> EcsResult<()> {
    if desc.name.is_empty() {
        return Err(EcsError::InvalidArgument);
    }

    if desc.flags.contains(ComponentFlags::TAG) {
        if desc.size != 0 {
            return Err(EcsError::InvalidArgument);
        }
        if desc.align != 0 && desc.align != 1 {
            return Err(EcsError::InvalidArgument);
        }
        return Ok(());
    }

    if desc.size == 0 {
        return Err(EcsError::InvalidArgument);
    }
    if !desc.align.is_power_of_two() {
        return Err(EcsError::InvalidArgument);
    }

    Ok(())
}
