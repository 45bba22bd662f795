//! Allocator layer: caller-supplied allocation hooks and owned raw buffers.
//!
//! All bulk storage (the entity slot table, chunk entity arrays, component
//! columns, and deferred command payloads) is allocated through a single
//! `(alloc, free)` hook pair so hosts can account for or arena-place the
//! engine's memory. Small bookkeeping (name strings, id vectors, match lists)
//! stays on the ordinary Rust heap.
//!
//! ## Contract
//! * A host supplies **both** hooks or **neither**; supplying one half fails
//!   world creation with `InvalidArgument`.
//! * Zero-byte requests short-circuit to null without touching the hook.
//! * Every free carries the exact `(size, align)` the matching alloc was
//!   given.
//!
//! The default hooks route through `std::alloc` with the precise layout, and
//! zero the block so fresh chunk rows read deterministically.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::marker::PhantomData;
use std::ptr;

use crate::engine::error::{EcsError, EcsResult};

/// Allocation hook: returns a block of `size` bytes at `align`, or null.
pub type AllocFn = fn(size: usize, align: usize, user: *mut ()) -> *mut u8;
/// Release hook: frees a block previously returned by the paired [`AllocFn`]
/// with the same `(size, align)`.
pub type FreeFn = fn(ptr: *mut u8, size: usize, align: usize, user: *mut ());

/// Optional allocator override carried in the world configuration.
///
/// The `user` pointer is forwarded verbatim to both hooks; when hooks are
/// shared across threads the pointee must be thread-safe.
#[derive(Clone, Copy)]
pub struct AllocatorConfig {
    /// Allocation hook, or `None` for the default.
    pub alloc: Option<AllocFn>,
    /// Release hook, or `None` for the default.
    pub free: Option<FreeFn>,
    /// Opaque pointer forwarded to both hooks.
    pub user: *mut (),
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            alloc: None,
            free: None,
            user: ptr::null_mut(),
        }
    }
}

fn default_alloc(size: usize, align: usize, _user: *mut ()) -> *mut u8 {
    let Ok(layout) = Layout::from_size_align(size, align) else {
        return ptr::null_mut();
    };
    // SAFETY: size is non-zero on this path (zero-size requests never reach
    // the hook) and the layout was validated above.
    unsafe { alloc_zeroed(layout) }
}

fn default_free(block: *mut u8, size: usize, align: usize, _user: *mut ()) {
    let Ok(layout) = Layout::from_size_align(size, align) else {
        return;
    };
    // SAFETY: the block came from `default_alloc` with this exact layout.
    unsafe { dealloc(block, layout) }
}

/// Resolved hook pair every internal allocation goes through.
#[derive(Clone, Copy)]
pub(crate) struct Allocator {
    alloc: AllocFn,
    free: FreeFn,
    user: *mut (),
}

// The hooks themselves are plain fns; the user pointer is opaque and the
// hook contract requires its pointee to tolerate the calling thread.
unsafe impl Send for Allocator {}
unsafe impl Sync for Allocator {}

impl Allocator {
    /// Resolves the configured hook pair, enforcing the both-or-neither rule.
    pub(crate) fn from_config(config: Option<&AllocatorConfig>) -> EcsResult<Allocator> {
        let config = config.copied().unwrap_or_default();
        match (config.alloc, config.free) {
            (Some(alloc), Some(free)) => Ok(Allocator {
                alloc,
                free,
                user: config.user,
            }),
            (None, None) => Ok(Allocator {
                alloc: default_alloc,
                free: default_free,
                user: ptr::null_mut(),
            }),
            _ => Err(EcsError::InvalidArgument),
        }
    }

    /// Requests `size` bytes at `align`; zero-size requests yield null
    /// without invoking the hook.
    pub(crate) fn alloc_bytes(&self, size: usize, align: usize) -> *mut u8 {
        if size == 0 {
            return ptr::null_mut();
        }
        (self.alloc)(size, align.max(1), self.user)
    }

    /// Returns a block to the hook with the layout it was allocated with.
    pub(crate) fn free_bytes(&self, block: *mut u8, size: usize, align: usize) {
        if block.is_null() || size == 0 {
            return;
        }
        (self.free)(block, size, align.max(1), self.user)
    }
}

/// Owned, untyped byte block allocated through the world allocator.
///
/// The buffer remembers its layout and a copy of the allocator, so it releases
/// itself on drop whether it was consumed, discarded, or torn down with the
/// world. Zero-size buffers own no storage and expose a null pointer.
pub(crate) struct RawBuffer {
    ptr: *mut u8,
    size: usize,
    align: usize,
    allocator: Allocator,
}

impl RawBuffer {
    /// A buffer owning no storage.
    pub(crate) fn empty(allocator: Allocator) -> RawBuffer {
        RawBuffer {
            ptr: ptr::null_mut(),
            size: 0,
            align: 1,
            allocator,
        }
    }

    /// Allocates a zeroed block of `size` bytes at `align`.
    pub(crate) fn alloc(allocator: Allocator, size: usize, align: usize) -> EcsResult<RawBuffer> {
        if size == 0 {
            return Ok(RawBuffer::empty(allocator));
        }
        let ptr = allocator.alloc_bytes(size, align);
        if ptr.is_null() {
            return Err(EcsError::AllocationFailed);
        }
        // Custom hooks are not required to zero; the engine relies on
        // deterministic fresh contents.
        unsafe { ptr::write_bytes(ptr, 0, size) };
        Ok(RawBuffer {
            ptr,
            size,
            align,
            allocator,
        })
    }

    #[inline]
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    #[inline]
    pub(crate) fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.size == 0
    }
}

impl Drop for RawBuffer {
    fn drop(&mut self) {
        self.allocator.free_bytes(self.ptr, self.size, self.align);
    }
}

unsafe impl Send for RawBuffer {}
unsafe impl Sync for RawBuffer {}

/// Fixed-layout array of plain-old-data elements backed by a [`RawBuffer`].
///
/// ## Invariants
/// - `capacity` elements are allocated and zero-initialized.
/// - Growth copies the full old contents and frees the old block with its
///   original layout.
pub(crate) struct RawArray<T: Copy> {
    buf: RawBuffer,
    capacity: u32,
    _marker: PhantomData<T>,
}

impl<T: Copy> RawArray<T> {
    /// An array with no storage.
    pub(crate) fn new(allocator: Allocator) -> RawArray<T> {
        RawArray {
            buf: RawBuffer::empty(allocator),
            capacity: 0,
            _marker: PhantomData,
        }
    }

    /// Allocates exactly `capacity` zeroed elements.
    pub(crate) fn with_capacity(allocator: Allocator, capacity: u32) -> EcsResult<RawArray<T>> {
        let mut array = RawArray::new(allocator);
        if capacity > 0 {
            array.buf = RawBuffer::alloc(
                allocator,
                array_size::<T>(capacity)?,
                core::mem::align_of::<T>(),
            )?;
            array.capacity = capacity;
        }
        Ok(array)
    }

    #[inline]
    pub(crate) fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Grows to hold at least `min_capacity` elements by doubling from
    /// `initial`, copying existing contents and releasing the old block.
    pub(crate) fn grow_to(&mut self, min_capacity: u32, initial: u32) -> EcsResult<()> {
        if self.capacity >= min_capacity {
            return Ok(());
        }

        let mut new_capacity = if self.capacity == 0 { initial.max(1) } else { self.capacity };
        while new_capacity < min_capacity {
            if new_capacity > u32::MAX / 2 {
                return Err(EcsError::CapacityReached);
            }
            new_capacity *= 2;
        }

        let allocator = self.buf.allocator;
        let new_buf = RawBuffer::alloc(
            allocator,
            array_size::<T>(new_capacity)?,
            core::mem::align_of::<T>(),
        )?;

        if self.capacity > 0 {
            // SAFETY: both blocks are at least `capacity` elements and
            // distinct allocations.
            unsafe {
                ptr::copy_nonoverlapping(
                    self.buf.as_ptr() as *const T,
                    new_buf.as_ptr() as *mut T,
                    self.capacity as usize,
                );
            }
        }

        self.buf = new_buf;
        self.capacity = new_capacity;
        Ok(())
    }

    #[inline]
    pub(crate) fn get(&self, index: u32) -> &T {
        debug_assert!(index < self.capacity);
        // SAFETY: callers index within `capacity`; storage is initialized.
        unsafe { &*(self.buf.as_ptr() as *const T).add(index as usize) }
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, index: u32) -> &mut T {
        debug_assert!(index < self.capacity);
        // SAFETY: as above, and `&mut self` guarantees uniqueness.
        unsafe { &mut *(self.buf.as_ptr() as *mut T).add(index as usize) }
    }

    #[inline]
    pub(crate) fn as_slice(&self, len: u32) -> &[T] {
        debug_assert!(len <= self.capacity);
        if len == 0 {
            return &[];
        }
        // SAFETY: `len` elements are allocated and initialized.
        unsafe { core::slice::from_raw_parts(self.buf.as_ptr() as *const T, len as usize) }
    }

    #[inline]
    pub(crate) fn as_ptr(&self) -> *mut T {
        self.buf.as_ptr() as *mut T
    }
}

fn array_size<T>(capacity: u32) -> EcsResult<usize> {
    core::mem::size_of::<T>()
        .checked_mul(capacity as usize)
        .ok_or(EcsError::CapacityReached)
}
