//! World orchestration: entity lifecycle, structural changes, and deferral.
//!
//! ## Purpose
//! `World` owns every piece of simulation state (the allocator, the entity
//! index, the component registry, the archetype arena, the deferred command
//! queue, and the diagnostic counters) and coordinates the structural
//! operations that rearrange storage:
//!
//! * creating and destroying entities,
//! * attaching and detaching components (migrating rows between archetypes),
//! * queueing those edits while a defer scope is open and replaying them on
//!   flush.
//!
//! ## Concurrency model
//! A world is single-threaded cooperative: the caller serializes every
//! mutating operation. Only the parallel chunk executor and the schedule
//! executor fan work out to threads, and those touch chunk payloads only,
//! never the entity index, the archetype list, or the deferred queue.
//!
//! ## Structural atomicity
//! Every operation either fails before touching storage or completes to a
//! consistent state: once a row migration begins it finishes, and the caller
//! observes success. Failures surface unchanged; nothing panics, nothing is
//! retried.
//!
//! ## Pointer invalidation
//! Pointers obtained from `get_component` or chunk views are valid only until
//! the next structural change. The safe typed accessors encode this rule in
//! borrow lifetimes; the raw accessors document it.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::engine::alloc::{Allocator, AllocatorConfig};
use crate::engine::archetype::ArchetypeStore;
use crate::engine::commands::{CommandQueue, DeferredOp, Payload};
use crate::engine::component::{ComponentDesc, ComponentRegistry};
use crate::engine::entity::EntityIndex;
use crate::engine::error::{EcsError, EcsResult};
use crate::engine::trace::{TraceEvent, TraceEventKind, TraceHook, WorldStats};
use crate::engine::types::{
    ArchetypeId, ComponentFlags, ComponentId, Entity, DEFAULT_CHUNK_BYTES,
};

static NEXT_WORLD_ID: AtomicU64 = AtomicU64::new(1);

/// Optional world construction parameters; zero fields select defaults.
#[derive(Clone, Copy)]
pub struct WorldConfig {
    /// Allocation hooks; both-or-neither.
    pub allocator: AllocatorConfig,
    /// Slots to pre-reserve in the entity table.
    pub initial_entity_capacity: u32,
    /// Component records to pre-reserve in the registry.
    pub initial_component_capacity: u32,
    /// Chunk byte budget; 0 selects [`DEFAULT_CHUNK_BYTES`].
    pub target_chunk_bytes: u32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            allocator: AllocatorConfig::default(),
            initial_entity_capacity: 0,
            initial_component_capacity: 0,
            target_chunk_bytes: 0,
        }
    }
}

/// A self-contained simulation world.
///
/// A process may hold any number of worlds; they share nothing, neither
/// component ids nor entity handles.
pub struct World {
    pub(crate) allocator: Allocator,
    pub(crate) target_chunk_bytes: u32,
    pub(crate) trace_hook: Option<TraceHook>,
    pub(crate) entities: EntityIndex,
    pub(crate) components: ComponentRegistry,
    pub(crate) archetypes: ArchetypeStore,
    pub(crate) root: ArchetypeId,
    pub(crate) deferred: CommandQueue,
    pub(crate) defer_depth: u32,
    flush_pending: u32,
    pub(crate) structural_moves: u64,
    pub(crate) world_id: u64,
}

// A world may be moved to another thread as a unit; the raw pointers it
// carries are into storage it exclusively owns. Hook user data shipped along
// must tolerate the new thread (hook contract).
unsafe impl Send for World {}

impl World {
    /// Creates a world.
    ///
    /// ## Errors
    /// - `InvalidArgument` when only one allocator hook is supplied.
    /// - `AllocationFailed`/`CapacityReached` when pre-reserving fails.
    pub fn new(config: Option<&WorldConfig>) -> EcsResult<World> {
        let default_config = WorldConfig::default();
        let config = config.unwrap_or(&default_config);

        let allocator = Allocator::from_config(Some(&config.allocator))?;
        let target_chunk_bytes = if config.target_chunk_bytes == 0 {
            DEFAULT_CHUNK_BYTES
        } else {
            config.target_chunk_bytes
        };

        let mut entities = EntityIndex::new(allocator);
        if config.initial_entity_capacity > 0 {
            entities.reserve(config.initial_entity_capacity)?;
        }

        let mut components = ComponentRegistry::new();
        if config.initial_component_capacity > 0 {
            components.reserve(config.initial_component_capacity);
        }

        let mut archetypes = ArchetypeStore::new();
        let root = archetypes.find_or_create(&components, target_chunk_bytes, &[])?;

        Ok(World {
            allocator,
            target_chunk_bytes,
            trace_hook: None,
            entities,
            components,
            archetypes,
            root,
            deferred: CommandQueue::new(),
            defer_depth: 0,
            flush_pending: 0,
            structural_moves: 0,
            world_id: NEXT_WORLD_ID.fetch_add(1, Ordering::Relaxed),
        })
    }

    /// Installs or clears the diagnostic observer.
    pub fn set_trace_hook(&mut self, hook: Option<TraceHook>) {
        self.trace_hook = hook;
    }

    /// Grows the entity table to hold at least `capacity` slots.
    pub fn reserve_entities(&mut self, capacity: u32) -> EcsResult<()> {
        self.entities.reserve(capacity)
    }

    /// Pre-reserves registry space for at least `capacity` component records.
    pub fn reserve_components(&mut self, capacity: u32) -> EcsResult<()> {
        self.components.reserve(capacity);
        Ok(())
    }

    /// Snapshot of the world's counters.
    pub fn get_stats(&self) -> WorldStats {
        WorldStats {
            live_entities: self.entities.live_count(),
            entity_capacity: self.entities.capacity(),
            allocated_entity_slots: self.entities.allocated(),
            free_entity_slots: self.entities.free_count(),
            registered_components: self.components.len(),
            archetype_count: self.archetypes.len(),
            chunk_count: self.archetypes.total_chunks(),
            pending_commands: self.pending_commands(),
            defer_depth: self.defer_depth,
            structural_moves: self.structural_moves,
        }
    }

    #[inline]
    pub(crate) fn pending_commands(&self) -> u32 {
        self.deferred.len() + self.flush_pending
    }

    pub(crate) fn emit(
        &self,
        kind: TraceEventKind,
        status: Option<EcsError>,
        entity: Entity,
        component_id: ComponentId,
        operation: u32,
    ) {
        if let Some(hook) = self.trace_hook.as_ref() {
            hook(&TraceEvent {
                kind,
                status,
                entity,
                component_id,
                operation,
                live_entities: self.entities.live_count(),
                pending_commands: self.pending_commands(),
                defer_depth: self.defer_depth,
            });
        }
    }

    // ── Defer scope ──────────────────────────────────────────────────────

    /// Opens a defer scope; structural edits queue until the scope closes
    /// and the queue is flushed.
    pub fn begin_defer(&mut self) -> EcsResult<()> {
        if self.defer_depth == u32::MAX {
            return Err(EcsError::CapacityReached);
        }
        self.defer_depth += 1;
        self.emit(
            TraceEventKind::DeferBegin,
            None,
            Entity::NULL,
            ComponentId::INVALID,
            0,
        );
        Ok(())
    }

    /// Closes the innermost defer scope.
    pub fn end_defer(&mut self) -> EcsResult<()> {
        if self.defer_depth == 0 {
            return Err(EcsError::Conflict);
        }
        self.defer_depth -= 1;
        self.emit(
            TraceEventKind::DeferEnd,
            None,
            Entity::NULL,
            ComponentId::INVALID,
            0,
        );
        Ok(())
    }

    /// Replays the deferred queue in enqueue order.
    ///
    /// ## Behavior
    /// - Fails with `Conflict` while any defer scope is open.
    /// - Stops at the first command that fails and returns that status;
    ///   already-applied commands stay applied, the rest of the queue is
    ///   released.
    pub fn flush(&mut self) -> EcsResult<()> {
        if self.defer_depth != 0 {
            return Err(EcsError::Conflict);
        }

        self.emit(
            TraceEventKind::FlushBegin,
            None,
            Entity::NULL,
            ComponentId::INVALID,
            0,
        );

        let ops = self.deferred.take();
        self.flush_pending = ops.len() as u32;

        let mut status: EcsResult<()> = Ok(());
        for op in ops {
            let entity = op.entity();
            let component_id = op.component_id();
            let kind_code = op.kind_code();

            let result = match op {
                DeferredOp::AddComponent {
                    entity,
                    component_id,
                    payload,
                } => self.add_component_now(
                    entity,
                    component_id,
                    payload.as_ref().map(Payload::as_bytes),
                ),
                DeferredOp::RemoveComponent {
                    entity,
                    component_id,
                } => self.remove_component_now(entity, component_id),
                DeferredOp::DestroyEntity { entity } => self.destroy_entity_now(entity),
            };

            let failure = result.err();
            self.emit(
                TraceEventKind::FlushApply,
                failure,
                entity,
                component_id,
                kind_code,
            );
            if let Some(error) = failure {
                status = Err(error);
                break;
            }
        }

        self.flush_pending = 0;
        self.emit(
            TraceEventKind::FlushEnd,
            status.err(),
            Entity::NULL,
            ComponentId::INVALID,
            0,
        );
        status
    }

    // ── Entity lifecycle ─────────────────────────────────────────────────

    /// Creates an entity in the empty root archetype.
    pub fn entity_create(&mut self) -> EcsResult<Entity> {
        let allocator = self.allocator;
        let (index, reused) = self.entities.acquire()?;
        let root = self.root;

        match self.archetypes.alloc_row(allocator, &self.components, root) {
            Ok((chunk, row)) => {
                let entity = self.entities.commit(index, root, chunk, row);
                self.archetypes
                    .get_mut(root)
                    .chunk_mut(chunk)
                    .set_entity(row, entity);
                self.emit(
                    TraceEventKind::EntityCreate,
                    None,
                    entity,
                    ComponentId::INVALID,
                    0,
                );
                Ok(entity)
            }
            Err(status) => {
                self.entities.release_unused(index, reused);
                Err(status)
            }
        }
    }

    /// Destroys an entity, or queues the destroy while deferring.
    pub fn entity_destroy(&mut self, entity: Entity) -> EcsResult<()> {
        if entity.is_null() {
            return Err(EcsError::InvalidArgument);
        }
        if self.defer_depth > 0 {
            return self.enqueue_destroy(entity);
        }
        self.destroy_entity_now(entity)
    }

    /// Total function; `false` for null, out-of-range, or stale handles.
    pub fn entity_is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    fn destroy_entity_now(&mut self, entity: Entity) -> EcsResult<()> {
        let slot = match self.entities.live_slot(entity) {
            Ok(slot) => slot,
            Err(status) => {
                self.emit(
                    TraceEventKind::EntityDestroy,
                    Some(status),
                    entity,
                    ComponentId::INVALID,
                    0,
                );
                return Err(status);
            }
        };
        let (archetype_id, chunk_id, row) = (slot.archetype, slot.chunk, slot.row);

        {
            let archetype = self.archetypes.get(archetype_id);
            let chunk = archetype.chunk(chunk_id);
            for (index, &component_id) in archetype.component_ids().iter().enumerate() {
                let record = self.components.record(component_id);
                record.destruct(chunk.column_ptr(index, row, record.size));
            }
        }

        let moved = self
            .archetypes
            .get_mut(archetype_id)
            .swap_remove_row(&self.components, chunk_id, row);
        if let Some(moved_entity) = moved {
            self.entities
                .set_location(moved_entity.index(), archetype_id, chunk_id, row);
            self.structural_moves += 1;
        }

        self.entities.release(entity.index());
        self.emit(
            TraceEventKind::EntityDestroy,
            None,
            entity,
            ComponentId::INVALID,
            0,
        );
        Ok(())
    }

    // ── Component registry ───────────────────────────────────────────────

    /// Registers a component type and returns its dense id.
    pub fn register_component(&mut self, desc: &ComponentDesc) -> EcsResult<ComponentId> {
        self.components.register(desc)
    }

    /// Case-sensitive registry lookup by name.
    pub fn find_component(&self, name: &str) -> EcsResult<ComponentId> {
        self.components.find_by_name(name)
    }

    /// Name of a registered component.
    pub fn component_name(&self, component_id: ComponentId) -> EcsResult<&str> {
        Ok(self.components.get(component_id)?.name.as_str())
    }

    /// `(size, align, flags)` of a registered component.
    pub fn component_layout(
        &self,
        component_id: ComponentId,
    ) -> EcsResult<(u32, u32, ComponentFlags)> {
        let record = self.components.get(component_id)?;
        Ok((record.size, record.align, record.flags))
    }

    // ── Entity ↔ component ───────────────────────────────────────────────

    /// Attaches a component, initialized from `initial` bytes, the
    /// component's constructor hook, or zero fill. Queues while deferring.
    ///
    /// `initial`, when given for a sized component, must be exactly the
    /// component's size; it is copied and may be reused immediately.
    pub fn add_component(
        &mut self,
        entity: Entity,
        component_id: ComponentId,
        initial: Option<&[u8]>,
    ) -> EcsResult<()> {
        if entity.is_null() || !component_id.is_valid() {
            return Err(EcsError::InvalidArgument);
        }
        if !self.components.contains(component_id) {
            return Err(EcsError::NotFound);
        }

        let size = self.components.record(component_id).size;
        let initial = if size == 0 { None } else { initial };
        if let Some(bytes) = initial {
            if bytes.len() != size as usize {
                return Err(EcsError::InvalidArgument);
            }
        }

        if self.defer_depth > 0 {
            return self.enqueue_add(entity, component_id, initial);
        }
        self.add_component_now(entity, component_id, initial)
    }

    /// Detaches a component, running its destructor hook. Queues while
    /// deferring.
    pub fn remove_component(
        &mut self,
        entity: Entity,
        component_id: ComponentId,
    ) -> EcsResult<()> {
        if entity.is_null() || !component_id.is_valid() {
            return Err(EcsError::InvalidArgument);
        }
        if !self.components.contains(component_id) {
            return Err(EcsError::NotFound);
        }

        if self.defer_depth > 0 {
            return self.enqueue_remove(entity, component_id);
        }
        self.remove_component_now(entity, component_id)
    }

    /// Returns whether the entity currently has the component. Observes only
    /// applied state; deferred edits are invisible until flushed.
    pub fn has_component(&self, entity: Entity, component_id: ComponentId) -> EcsResult<bool> {
        if entity.is_null() || !component_id.is_valid() {
            return Err(EcsError::InvalidArgument);
        }
        if !self.components.contains(component_id) {
            return Ok(false);
        }
        let slot = self.entities.live_slot(entity)?;
        Ok(self.archetypes.get(slot.archetype).contains(component_id))
    }

    /// Type-erased pointer to the entity's value of this component.
    ///
    /// Tags report success with `None`. The pointer is valid only until the
    /// next structural change affecting the entity's archetype.
    pub fn get_component(
        &self,
        entity: Entity,
        component_id: ComponentId,
    ) -> EcsResult<Option<NonNull<u8>>> {
        if entity.is_null() || !component_id.is_valid() {
            return Err(EcsError::InvalidArgument);
        }
        if !self.components.contains(component_id) {
            return Err(EcsError::NotFound);
        }

        let slot = self.entities.live_slot(entity)?;
        let archetype = self.archetypes.get(slot.archetype);
        let Some(index) = archetype.find_component_index(component_id) else {
            return Err(EcsError::NotFound);
        };

        let record = self.components.record(component_id);
        if record.size == 0 {
            return Ok(None);
        }
        Ok(NonNull::new(archetype.chunk(slot.chunk).column_ptr(
            index,
            slot.row,
            record.size,
        )))
    }

    // ── Typed convenience layer ──────────────────────────────────────────

    /// Attaches a component by value. The registered layout must match `T`.
    pub fn add_component_value<T: 'static + Send + Sync>(
        &mut self,
        entity: Entity,
        component_id: ComponentId,
        value: T,
    ) -> EcsResult<()> {
        let (size, align) = {
            let record = self.components.get(component_id)?;
            (record.size, record.align)
        };
        if size as usize != core::mem::size_of::<T>()
            || (align as usize) < core::mem::align_of::<T>()
        {
            return Err(EcsError::InvalidArgument);
        }

        if core::mem::size_of::<T>() == 0 {
            self.add_component(entity, component_id, None)?;
        } else {
            // SAFETY: T's bytes are read once and ownership transfers into
            // storage; the original is forgotten below.
            let bytes = unsafe {
                core::slice::from_raw_parts(
                    &value as *const T as *const u8,
                    core::mem::size_of::<T>(),
                )
            };
            self.add_component(entity, component_id, Some(bytes))?;
        }
        core::mem::forget(value);
        Ok(())
    }

    /// Borrows the entity's value of this component. The registered layout
    /// must match `T`.
    pub fn get_component_ref<T: 'static>(
        &self,
        entity: Entity,
        component_id: ComponentId,
    ) -> EcsResult<&T> {
        self.check_typed_layout::<T>(component_id)?;
        match self.get_component(entity, component_id)? {
            // SAFETY: layout was validated and the borrow of self prevents
            // structural changes for the reference's lifetime.
            Some(ptr) => Ok(unsafe { ptr.cast::<T>().as_ref() }),
            // Only zero-sized components reach here; a dangling, well-aligned
            // pointer is a valid ZST reference.
            None => Ok(unsafe { NonNull::<T>::dangling().as_ref() }),
        }
    }

    /// Mutably borrows the entity's value of this component.
    pub fn get_component_mut<T: 'static>(
        &mut self,
        entity: Entity,
        component_id: ComponentId,
    ) -> EcsResult<&mut T> {
        self.check_typed_layout::<T>(component_id)?;
        match self.get_component(entity, component_id)? {
            // SAFETY: as in `get_component_ref`, plus `&mut self` guarantees
            // exclusivity.
            Some(ptr) => Ok(unsafe { &mut *ptr.cast::<T>().as_ptr() }),
            None => Ok(unsafe { &mut *NonNull::<T>::dangling().as_ptr() }),
        }
    }

    fn check_typed_layout<T>(&self, component_id: ComponentId) -> EcsResult<()> {
        let record = self.components.get(component_id)?;
        if record.size as usize != core::mem::size_of::<T>()
            || (record.align as usize) < core::mem::align_of::<T>()
        {
            return Err(EcsError::InvalidArgument);
        }
        Ok(())
    }

    // ── Introspection snapshots ──────────────────────────────────────────

    /// Copies registered component ids into `out`; returns the count written.
    pub fn component_ids(&self, out: &mut [ComponentId]) -> usize {
        let count = (self.components.len() as usize).min(out.len());
        for (index, slot) in out.iter_mut().take(count).enumerate() {
            *slot = ComponentId(index as u32 + 1);
        }
        count
    }

    /// Copies live entity handles into `out` in slot order; returns the
    /// count written.
    pub fn live_entities(&self, out: &mut [Entity]) -> usize {
        self.entities.copy_live(out)
    }

    /// Copies the entity's component ids (sorted) into `out`; returns the
    /// count written.
    pub fn entity_components(
        &self,
        entity: Entity,
        out: &mut [ComponentId],
    ) -> EcsResult<usize> {
        if entity.is_null() {
            return Err(EcsError::InvalidArgument);
        }
        let slot = self.entities.live_slot(entity)?;
        let ids = self.archetypes.get(slot.archetype).component_ids();
        let count = ids.len().min(out.len());
        out[..count].copy_from_slice(&ids[..count]);
        Ok(count)
    }

    // ── Structural internals ─────────────────────────────────────────────

    fn add_component_now(
        &mut self,
        entity: Entity,
        component_id: ComponentId,
        initial: Option<&[u8]>,
    ) -> EcsResult<()> {
        let slot = match self.entities.live_slot(entity) {
            Ok(slot) => slot,
            Err(status) => {
                self.emit(
                    TraceEventKind::ComponentAdd,
                    Some(status),
                    entity,
                    component_id,
                    0,
                );
                return Err(status);
            }
        };
        let (src_id, src_chunk, src_row) = (slot.archetype, slot.chunk, slot.row);

        if self.archetypes.get(src_id).contains(component_id) {
            self.emit(
                TraceEventKind::ComponentAdd,
                Some(EcsError::AlreadyExists),
                entity,
                component_id,
                0,
            );
            return Err(EcsError::AlreadyExists);
        }

        let dst_ids = {
            let src_ids = self.archetypes.get(src_id).component_ids();
            let mut ids = Vec::with_capacity(src_ids.len() + 1);
            let insert_at = src_ids
                .iter()
                .position(|&id| component_id.0 < id.0)
                .unwrap_or(src_ids.len());
            ids.extend_from_slice(&src_ids[..insert_at]);
            ids.push(component_id);
            ids.extend_from_slice(&src_ids[insert_at..]);
            ids
        };

        let allocator = self.allocator;
        let dst_id =
            self.archetypes
                .find_or_create(&self.components, self.target_chunk_bytes, &dst_ids)?;
        let (dst_chunk, dst_row) = self
            .archetypes
            .alloc_row(allocator, &self.components, dst_id)?;
        self.archetypes
            .get_mut(dst_id)
            .chunk_mut(dst_chunk)
            .set_entity(dst_row, entity);

        {
            let src_arch = self.archetypes.get(src_id);
            let dst_arch = self.archetypes.get(dst_id);
            let src_chunk_ref = src_arch.chunk(src_chunk);
            let dst_chunk_ref = dst_arch.chunk(dst_chunk);

            for (index, &dst_component) in dst_arch.component_ids().iter().enumerate() {
                let record = self.components.record(dst_component);
                let dst_ptr = dst_chunk_ref.column_ptr(index, dst_row, record.size);
                if dst_component == component_id {
                    record.construct_into(dst_ptr, initial);
                } else if let Some(src_index) = src_arch.find_component_index(dst_component) {
                    let src_ptr = src_chunk_ref.column_ptr(src_index, src_row, record.size);
                    record.transfer(dst_ptr, src_ptr);
                }
            }
        }

        self.entities
            .set_location(entity.index(), dst_id, dst_chunk, dst_row);
        self.structural_moves += 1;

        let moved = self
            .archetypes
            .get_mut(src_id)
            .swap_remove_row(&self.components, src_chunk, src_row);
        if let Some(moved_entity) = moved {
            self.entities
                .set_location(moved_entity.index(), src_id, src_chunk, src_row);
            self.structural_moves += 1;
        }

        self.emit(TraceEventKind::ComponentAdd, None, entity, component_id, 0);
        Ok(())
    }

    fn remove_component_now(
        &mut self,
        entity: Entity,
        component_id: ComponentId,
    ) -> EcsResult<()> {
        let slot = match self.entities.live_slot(entity) {
            Ok(slot) => slot,
            Err(status) => {
                self.emit(
                    TraceEventKind::ComponentRemove,
                    Some(status),
                    entity,
                    component_id,
                    0,
                );
                return Err(status);
            }
        };
        let (src_id, src_chunk, src_row) = (slot.archetype, slot.chunk, slot.row);

        let Some(removed_index) = self.archetypes.get(src_id).find_component_index(component_id)
        else {
            self.emit(
                TraceEventKind::ComponentRemove,
                Some(EcsError::NotFound),
                entity,
                component_id,
                0,
            );
            return Err(EcsError::NotFound);
        };

        let dst_ids: Vec<ComponentId> = self
            .archetypes
            .get(src_id)
            .component_ids()
            .iter()
            .copied()
            .filter(|&id| id != component_id)
            .collect();

        let allocator = self.allocator;
        let dst_id =
            self.archetypes
                .find_or_create(&self.components, self.target_chunk_bytes, &dst_ids)?;
        let (dst_chunk, dst_row) = self
            .archetypes
            .alloc_row(allocator, &self.components, dst_id)?;
        self.archetypes
            .get_mut(dst_id)
            .chunk_mut(dst_chunk)
            .set_entity(dst_row, entity);

        {
            let src_arch = self.archetypes.get(src_id);
            let dst_arch = self.archetypes.get(dst_id);
            let src_chunk_ref = src_arch.chunk(src_chunk);
            let dst_chunk_ref = dst_arch.chunk(dst_chunk);

            for (index, &dst_component) in dst_arch.component_ids().iter().enumerate() {
                let record = self.components.record(dst_component);
                if let Some(src_index) = src_arch.find_component_index(dst_component) {
                    let src_ptr = src_chunk_ref.column_ptr(src_index, src_row, record.size);
                    let dst_ptr = dst_chunk_ref.column_ptr(index, dst_row, record.size);
                    record.transfer(dst_ptr, src_ptr);
                }
            }

            let record = self.components.record(component_id);
            record.destruct(src_chunk_ref.column_ptr(removed_index, src_row, record.size));
        }

        self.entities
            .set_location(entity.index(), dst_id, dst_chunk, dst_row);
        self.structural_moves += 1;

        let moved = self
            .archetypes
            .get_mut(src_id)
            .swap_remove_row(&self.components, src_chunk, src_row);
        if let Some(moved_entity) = moved {
            self.entities
                .set_location(moved_entity.index(), src_id, src_chunk, src_row);
            self.structural_moves += 1;
        }

        self.emit(
            TraceEventKind::ComponentRemove,
            None,
            entity,
            component_id,
            0,
        );
        Ok(())
    }

    // ── Deferred enqueue paths ───────────────────────────────────────────

    fn queue_capacity_check(&self) -> EcsResult<()> {
        if self.deferred.len() == u32::MAX {
            return Err(EcsError::CapacityReached);
        }
        Ok(())
    }

    fn enqueue_add(
        &mut self,
        entity: Entity,
        component_id: ComponentId,
        initial: Option<&[u8]>,
    ) -> EcsResult<()> {
        const OP: u32 = 1;
        if let Err(status) = self.queue_capacity_check() {
            self.emit(
                TraceEventKind::DeferEnqueue,
                Some(status),
                entity,
                component_id,
                OP,
            );
            return Err(status);
        }

        let align = self.components.record(component_id).align;
        let payload = match initial {
            Some(bytes) => match Payload::copy_from(self.allocator, bytes, align) {
                Ok(payload) => Some(payload),
                Err(status) => {
                    self.emit(
                        TraceEventKind::DeferEnqueue,
                        Some(status),
                        entity,
                        component_id,
                        OP,
                    );
                    return Err(status);
                }
            },
            None => None,
        };

        self.deferred.push(DeferredOp::AddComponent {
            entity,
            component_id,
            payload,
        });
        self.emit(TraceEventKind::DeferEnqueue, None, entity, component_id, OP);
        Ok(())
    }

    fn enqueue_remove(&mut self, entity: Entity, component_id: ComponentId) -> EcsResult<()> {
        const OP: u32 = 2;
        if let Err(status) = self.queue_capacity_check() {
            self.emit(
                TraceEventKind::DeferEnqueue,
                Some(status),
                entity,
                component_id,
                OP,
            );
            return Err(status);
        }

        self.deferred.push(DeferredOp::RemoveComponent {
            entity,
            component_id,
        });
        self.emit(TraceEventKind::DeferEnqueue, None, entity, component_id, OP);
        Ok(())
    }

    fn enqueue_destroy(&mut self, entity: Entity) -> EcsResult<()> {
        const OP: u32 = 3;
        if let Err(status) = self.queue_capacity_check() {
            self.emit(
                TraceEventKind::DeferEnqueue,
                Some(status),
                entity,
                ComponentId::INVALID,
                OP,
            );
            return Err(status);
        }

        self.deferred.push(DeferredOp::DestroyEntity { entity });
        self.emit(
            TraceEventKind::DeferEnqueue,
            None,
            entity,
            ComponentId::INVALID,
            OP,
        );
        Ok(())
    }
}

impl Drop for World {
    fn drop(&mut self) {
        // Run destructor hooks on every live row; the buffers release
        // themselves with their original layouts afterwards.
        for (_, archetype) in self.archetypes.iter() {
            for chunk in archetype.chunks() {
                for row in 0..chunk.count() {
                    for (index, &component_id) in archetype.component_ids().iter().enumerate() {
                        let record = self.components.record(component_id);
                        record.destruct(chunk.column_ptr(index, row, record.size));
                    }
                }
            }
        }
    }
}
