//! Archetype and chunk storage: sorted component sets over chunked SoA columns.
//!
//! ## Purpose
//! An archetype is the equivalence class of entities sharing exactly one
//! component-id set. It owns a list of fixed-capacity chunks; each chunk
//! stores an entity-handle array plus one contiguous column per component,
//! with identical row indexing across the entity array and every column.
//!
//! ## Design
//! - Component-id tuples are kept sorted ascending and are unique per world;
//!   the sets are small, so lookups are linear scans.
//! - `rows_per_chunk` is derived once from the world's chunk byte budget:
//!   `budget / (entity handle + per-row component bytes)`, clamped to
//!   `[1, MAX_ROWS_PER_CHUNK]`. Equal sets always derive equal row counts.
//! - Chunks live in a `Vec` in append order; row allocation fills the first
//!   non-full chunk and appends a fresh chunk when all are full. Chunks are
//!   never removed, so `ChunkId` indices stay stable.
//! - Removal is swap-remove: the tail row overwrites the hole and the moved
//!   entity is reported so the caller can patch its slot back-reference.
//!
//! ## Invariants
//! - Every chunk holds exactly `count` valid rows starting at row 0; rows in
//!   `[count, capacity)` are never read.
//! - All columns of a chunk are row-aligned with the entity array.
//! - Zero-size components own no column bytes.

use std::ptr;

use crate::engine::alloc::{Allocator, RawArray, RawBuffer};
use crate::engine::component::ComponentRegistry;
use crate::engine::error::{EcsError, EcsResult};
use crate::engine::types::{
    ArchetypeId, ChunkId, ComponentId, Entity, Row, MAX_ROWS_PER_CHUNK,
};

/// Fixed-capacity SoA block of one archetype.
pub(crate) struct Chunk {
    count: u32,
    capacity: u32,
    entities: RawArray<Entity>,
    columns: Vec<RawBuffer>,
}

impl Chunk {
    /// Allocates a chunk: one block for the entity array plus one block per
    /// non-empty component column, each at the component's alignment.
    fn new(
        allocator: Allocator,
        registry: &ComponentRegistry,
        component_ids: &[ComponentId],
        capacity: u32,
    ) -> EcsResult<Chunk> {
        let entities = RawArray::with_capacity(allocator, capacity)?;

        let mut columns = Vec::with_capacity(component_ids.len());
        for &component_id in component_ids {
            let record = registry.record(component_id);
            if record.size == 0 {
                columns.push(RawBuffer::empty(allocator));
                continue;
            }
            let bytes = (record.size as usize)
                .checked_mul(capacity as usize)
                .ok_or(EcsError::CapacityReached)?;
            columns.push(RawBuffer::alloc(allocator, bytes, record.align as usize)?);
        }

        Ok(Chunk {
            count: 0,
            capacity,
            entities,
            columns,
        })
    }

    #[inline]
    pub(crate) fn count(&self) -> u32 {
        self.count
    }

    #[inline]
    pub(crate) fn is_full(&self) -> bool {
        self.count == self.capacity
    }

    /// Live rows of the entity array.
    #[inline]
    pub(crate) fn entities(&self) -> &[Entity] {
        self.entities.as_slice(self.count)
    }

    #[inline]
    pub(crate) fn entity(&self, row: Row) -> Entity {
        debug_assert!(row < self.count);
        *self.entities.get(row)
    }

    #[inline]
    pub(crate) fn set_entity(&mut self, row: Row, entity: Entity) {
        debug_assert!(row < self.count);
        *self.entities.get_mut(row) = entity;
    }

    /// Start of column `column_index`, or null for empty components.
    #[inline]
    pub(crate) fn column_base(&self, column_index: usize) -> *mut u8 {
        let column = &self.columns[column_index];
        if column.is_empty() {
            ptr::null_mut()
        } else {
            column.as_ptr()
        }
    }

    /// Address of `row` inside column `column_index`, or null for empty
    /// components.
    #[inline]
    pub(crate) fn column_ptr(&self, column_index: usize, row: Row, size: u32) -> *mut u8 {
        if size == 0 {
            return ptr::null_mut();
        }
        debug_assert!(row < self.capacity);
        // SAFETY: the column holds `size * capacity` bytes and row is in range.
        unsafe { self.columns[column_index].as_ptr().add(size as usize * row as usize) }
    }
}

/// Storage for all entities sharing one sorted component-id set.
pub(crate) struct Archetype {
    component_ids: Vec<ComponentId>,
    rows_per_chunk: u32,
    chunks: Vec<Chunk>,
}

impl Archetype {
    fn new(
        registry: &ComponentRegistry,
        target_chunk_bytes: u32,
        component_ids: Vec<ComponentId>,
    ) -> Archetype {
        debug_assert!(component_ids.windows(2).all(|pair| pair[0].0 < pair[1].0));
        let rows_per_chunk = compute_rows_per_chunk(registry, &component_ids, target_chunk_bytes);
        Archetype {
            component_ids,
            rows_per_chunk,
            chunks: Vec::new(),
        }
    }

    #[inline]
    pub(crate) fn component_ids(&self) -> &[ComponentId] {
        &self.component_ids
    }

    #[inline]
    pub(crate) fn component_count(&self) -> usize {
        self.component_ids.len()
    }

    /// Linear scan of the sorted id tuple.
    #[inline]
    pub(crate) fn find_component_index(&self, component_id: ComponentId) -> Option<usize> {
        self.component_ids.iter().position(|&id| id == component_id)
    }

    #[inline]
    pub(crate) fn contains(&self, component_id: ComponentId) -> bool {
        self.find_component_index(component_id).is_some()
    }

    #[inline]
    pub(crate) fn rows_per_chunk(&self) -> u32 {
        self.rows_per_chunk
    }

    #[inline]
    pub(crate) fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    #[inline]
    pub(crate) fn chunk(&self, chunk: ChunkId) -> &Chunk {
        &self.chunks[chunk.index()]
    }

    #[inline]
    pub(crate) fn chunk_mut(&mut self, chunk: ChunkId) -> &mut Chunk {
        &mut self.chunks[chunk.index()]
    }

    /// Claims the next dense row: the first non-full chunk, or a freshly
    /// appended one. The row's entity handle and columns are left for the
    /// caller to fill.
    fn alloc_row(
        &mut self,
        allocator: Allocator,
        registry: &ComponentRegistry,
    ) -> EcsResult<(ChunkId, Row)> {
        for (index, chunk) in self.chunks.iter_mut().enumerate() {
            if !chunk.is_full() {
                let row = chunk.count;
                chunk.count += 1;
                return Ok((ChunkId(index as u32), row));
            }
        }

        if self.chunks.len() as u64 >= u32::MAX as u64 {
            return Err(EcsError::CapacityReached);
        }

        let mut chunk = Chunk::new(allocator, registry, &self.component_ids, self.rows_per_chunk)?;
        chunk.count = 1;
        self.chunks.push(chunk);
        Ok((ChunkId(self.chunks.len() as u32 - 1), 0))
    }

    /// Removes `row` by overwriting it with the tail row and shrinking the
    /// chunk.
    ///
    /// ## Behavior
    /// - When the removed row is the tail, nothing is copied.
    /// - Otherwise the tail entity handle and every non-empty column value
    ///   are relocated into `row` (move hook or bitwise), and the relocated
    ///   entity is returned so the caller can patch its slot back-reference
    ///   and account the structural move.
    pub(crate) fn swap_remove_row(
        &mut self,
        registry: &ComponentRegistry,
        chunk_id: ChunkId,
        row: Row,
    ) -> Option<Entity> {
        let chunk = &mut self.chunks[chunk_id.index()];
        debug_assert!(chunk.count > 0 && row < chunk.count);

        let last_row = chunk.count - 1;
        if row == last_row {
            chunk.count -= 1;
            return None;
        }

        let moved_entity = chunk.entity(last_row);
        chunk.set_entity(row, moved_entity);

        for (index, &component_id) in self.component_ids.iter().enumerate() {
            let record = registry.record(component_id);
            if record.size == 0 {
                continue;
            }
            let dst = chunk.column_ptr(index, row, record.size);
            let src = chunk.column_ptr(index, last_row, record.size);
            record.transfer(dst, src);
        }

        chunk.count -= 1;
        Some(moved_entity)
    }
}

/// Arena of every archetype in one world, keyed by sorted component-id set.
pub(crate) struct ArchetypeStore {
    archetypes: Vec<Archetype>,
    total_chunks: u32,
}

impl ArchetypeStore {
    pub(crate) fn new() -> ArchetypeStore {
        ArchetypeStore {
            archetypes: Vec::new(),
            total_chunks: 0,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> u32 {
        self.archetypes.len() as u32
    }

    #[inline]
    pub(crate) fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    #[inline]
    pub(crate) fn get(&self, id: ArchetypeId) -> &Archetype {
        &self.archetypes[id.index()]
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, id: ArchetypeId) -> &mut Archetype {
        &mut self.archetypes[id.index()]
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (ArchetypeId, &Archetype)> {
        self.archetypes
            .iter()
            .enumerate()
            .map(|(index, archetype)| (ArchetypeId(index as u32), archetype))
    }

    /// Locates the archetype with exactly this sorted id set.
    pub(crate) fn find(&self, component_ids: &[ComponentId]) -> Option<ArchetypeId> {
        self.archetypes
            .iter()
            .position(|archetype| archetype.component_ids == component_ids)
            .map(|index| ArchetypeId(index as u32))
    }

    /// Locates or creates the archetype for this sorted id set.
    pub(crate) fn find_or_create(
        &mut self,
        registry: &ComponentRegistry,
        target_chunk_bytes: u32,
        component_ids: &[ComponentId],
    ) -> EcsResult<ArchetypeId> {
        if let Some(id) = self.find(component_ids) {
            return Ok(id);
        }

        if self.archetypes.len() as u64 >= u32::MAX as u64 {
            return Err(EcsError::CapacityReached);
        }

        self.archetypes.push(Archetype::new(
            registry,
            target_chunk_bytes,
            component_ids.to_vec(),
        ));
        Ok(ArchetypeId(self.archetypes.len() as u32 - 1))
    }

    /// Allocates a dense row in `id`, tracking the world-wide chunk count.
    pub(crate) fn alloc_row(
        &mut self,
        allocator: Allocator,
        registry: &ComponentRegistry,
        id: ArchetypeId,
    ) -> EcsResult<(ChunkId, Row)> {
        let archetype = &mut self.archetypes[id.index()];
        let chunks_before = archetype.chunks.len();
        let slot = archetype.alloc_row(allocator, registry)?;
        if archetype.chunks.len() > chunks_before {
            self.total_chunks += 1;
        }
        Ok(slot)
    }
}

/// Rows that fit the byte budget once the entity handle and every component's
/// per-row bytes are accounted for, clamped to `[1, MAX_ROWS_PER_CHUNK]`.
fn compute_rows_per_chunk(
    registry: &ComponentRegistry,
    component_ids: &[ComponentId],
    target_chunk_bytes: u32,
) -> u32 {
    let mut per_row_bytes = core::mem::size_of::<Entity>() as u64;
    for &component_id in component_ids {
        per_row_bytes = per_row_bytes.saturating_add(registry.record(component_id).size as u64);
    }

    let rows = (target_chunk_bytes as u64 / per_row_bytes) as u32;
    rows.clamp(1, MAX_ROWS_PER_CHUNK)
}
