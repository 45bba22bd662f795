//! Entity index: slot table, generation versioning, and free-list reuse.
//!
//! ## Purpose
//! Entities are lightweight handles referencing rows in archetype storage.
//! This module owns the slot table that maps a handle's index to:
//!
//! - the slot's current generation (stale-handle detection),
//! - an alive flag,
//! - the `(archetype, chunk, row)` back-reference into storage,
//! - the free-list link used while the slot is vacant.
//!
//! ## Invariants
//! - Exactly one of the following holds per slot: `alive` with valid
//!   back-references and no free link, or not alive with cleared
//!   back-references and membership on the free list.
//! - A live slot's generation is never zero; destroy bumps the generation,
//!   wrapping past zero to one.
//! - The table grows by doubling (initially 64 slots), copying the old
//!   contents and releasing the old block with its original layout.
//!
//! ## Concurrency
//! The index is single-threaded; the owning world serializes access.

use crate::engine::alloc::{Allocator, RawArray};
use crate::engine::error::{EcsError, EcsResult};
use crate::engine::types::{ArchetypeId, ChunkId, Entity, Row};

const FREE_NONE: u32 = u32::MAX;
const INITIAL_SLOTS: u32 = 64;

/// One entry of the slot table.
#[derive(Clone, Copy)]
pub(crate) struct EntitySlot {
    pub(crate) generation: u32,
    pub(crate) next_free: u32,
    pub(crate) alive: bool,
    pub(crate) archetype: ArchetypeId,
    pub(crate) chunk: ChunkId,
    pub(crate) row: Row,
}

impl EntitySlot {
    fn vacant() -> EntitySlot {
        EntitySlot {
            generation: 0,
            next_free: FREE_NONE,
            alive: false,
            archetype: ArchetypeId(0),
            chunk: ChunkId(0),
            row: 0,
        }
    }
}

/// Slot table plus free-list bookkeeping.
pub(crate) struct EntityIndex {
    slots: RawArray<EntitySlot>,
    allocated: u32,
    free_head: u32,
    free_count: u32,
    live_count: u32,
}

impl EntityIndex {
    pub(crate) fn new(allocator: Allocator) -> EntityIndex {
        EntityIndex {
            slots: RawArray::new(allocator),
            allocated: 0,
            free_head: FREE_NONE,
            free_count: 0,
            live_count: 0,
        }
    }

    /// Grows the table to hold at least `capacity` slots. An empty table
    /// starts at exactly `capacity`; later growth doubles from there.
    pub(crate) fn reserve(&mut self, capacity: u32) -> EcsResult<()> {
        self.slots.grow_to(capacity, capacity)
    }

    #[inline]
    pub(crate) fn capacity(&self) -> u32 {
        self.slots.capacity()
    }

    #[inline]
    pub(crate) fn allocated(&self) -> u32 {
        self.allocated
    }

    #[inline]
    pub(crate) fn free_count(&self) -> u32 {
        self.free_count
    }

    #[inline]
    pub(crate) fn live_count(&self) -> u32 {
        self.live_count
    }

    /// Takes a slot index off the free list, or claims a fresh one, growing
    /// the table when exhausted.
    ///
    /// The slot is not yet live; callers either [`commit`](Self::commit) it
    /// once its storage row exists or return it with
    /// [`release_unused`](Self::release_unused).
    pub(crate) fn acquire(&mut self) -> EcsResult<(u32, bool)> {
        if self.free_head != FREE_NONE {
            let index = self.free_head;
            let slot = self.slots.get_mut(index);
            self.free_head = slot.next_free;
            slot.next_free = FREE_NONE;
            self.free_count -= 1;
            return Ok((index, true));
        }

        if self.allocated == u32::MAX {
            return Err(EcsError::CapacityReached);
        }
        if self.allocated == self.slots.capacity() {
            self.slots.grow_to(self.allocated + 1, INITIAL_SLOTS)?;
        }

        let index = self.allocated;
        self.allocated += 1;
        *self.slots.get_mut(index) = EntitySlot::vacant();
        Ok((index, false))
    }

    /// Returns an acquired-but-uncommitted slot, undoing [`acquire`](Self::acquire).
    pub(crate) fn release_unused(&mut self, index: u32, reused: bool) {
        if reused {
            let head = self.free_head;
            let slot = self.slots.get_mut(index);
            slot.next_free = head;
            self.free_head = index;
            self.free_count += 1;
        } else {
            self.allocated -= 1;
            *self.slots.get_mut(index) = EntitySlot::vacant();
        }
    }

    /// Marks an acquired slot live at the given storage location and returns
    /// the issued handle.
    pub(crate) fn commit(
        &mut self,
        index: u32,
        archetype: ArchetypeId,
        chunk: ChunkId,
        row: Row,
    ) -> Entity {
        let slot = self.slots.get_mut(index);
        if slot.generation == 0 {
            slot.generation = 1;
        }
        slot.alive = true;
        slot.next_free = FREE_NONE;
        slot.archetype = archetype;
        slot.chunk = chunk;
        slot.row = row;
        self.live_count += 1;
        Entity::pack(index, slot.generation)
    }

    /// Resolves a handle to its live slot.
    ///
    /// ## Errors
    /// - `InvalidArgument` for the null handle.
    /// - `StaleEntity` when the index is out of range, the slot is free, or
    ///   the generation does not match.
    pub(crate) fn live_slot(&self, entity: Entity) -> EcsResult<&EntitySlot> {
        if entity.is_null() {
            return Err(EcsError::InvalidArgument);
        }
        let index = entity.index();
        if index >= self.allocated {
            return Err(EcsError::StaleEntity);
        }
        let slot = self.slots.get(index);
        if !slot.alive || slot.generation != entity.generation() {
            return Err(EcsError::StaleEntity);
        }
        Ok(slot)
    }

    /// Total function: `false` for null, out-of-range, free, or stale handles.
    pub(crate) fn is_alive(&self, entity: Entity) -> bool {
        if entity.is_null() {
            return false;
        }
        let index = entity.index();
        if index >= self.allocated {
            return false;
        }
        let slot = self.slots.get(index);
        slot.alive && slot.generation == entity.generation()
    }

    /// Rewrites the storage back-reference of a live slot after a row move.
    pub(crate) fn set_location(
        &mut self,
        index: u32,
        archetype: ArchetypeId,
        chunk: ChunkId,
        row: Row,
    ) {
        if index >= self.allocated {
            return;
        }
        let slot = self.slots.get_mut(index);
        debug_assert!(slot.alive);
        slot.archetype = archetype;
        slot.chunk = chunk;
        slot.row = row;
    }

    /// Retires a live slot: bumps the generation (wrapping past zero to one),
    /// clears back-references, and pushes the slot on the free list.
    pub(crate) fn release(&mut self, index: u32) {
        let head = self.free_head;
        let slot = self.slots.get_mut(index);
        debug_assert!(slot.alive);
        slot.alive = false;
        slot.generation = slot.generation.wrapping_add(1);
        if slot.generation == 0 {
            slot.generation = 1;
        }
        slot.archetype = ArchetypeId(0);
        slot.chunk = ChunkId(0);
        slot.row = 0;
        slot.next_free = head;
        self.free_head = index;
        self.free_count += 1;
        self.live_count -= 1;
    }

    /// Copies live handles into `out` in slot order; returns the count written.
    pub(crate) fn copy_live(&self, out: &mut [Entity]) -> usize {
        let mut written = 0;
        for index in 0..self.allocated {
            if written == out.len() {
                break;
            }
            let slot = self.slots.get(index);
            if slot.alive {
                out[written] = Entity::pack(index, slot.generation);
                written += 1;
            }
        }
        written
    }
}
