//! Query compilation and chunk iteration.
//!
//! A query is an include/exclude filter over archetypes with a declared
//! access mode per included component. Compilation validates the descriptor;
//! the cached archetype match list refreshes at creation and again at every
//! `iter_begin`, so a query never observes archetypes created after its last
//! refresh mid-iteration.
//!
//! ## Iteration model
//! The iterator yields one [`ChunkView`] per non-empty chunk of every matched
//! archetype, in a deterministic order: archetypes in match-list order,
//! chunks in their append order. Each chunk appears at most once; after the
//! last chunk the iterator reports exhaustion forever.
//!
//! ## Structural safety
//! The iterator borrows the world shared, so structural changes cannot be
//! applied while it is live; batches of edits are queued through the deferred
//! buffer and flushed between sweeps. Column pointers inside a view are valid
//! for the view's lifetime only.

use crate::engine::error::{EcsError, EcsResult};
use crate::engine::trace::TraceEventKind;
use crate::engine::types::{Access, ArchetypeId, ComponentId, Entity};
use crate::engine::world::World;

/// One included component with its declared access mode.
#[derive(Clone, Copy, Debug)]
pub struct QueryTerm {
    /// Component to include.
    pub component_id: ComponentId,
    /// Declared access.
    pub access: Access,
}

/// Builder-style query description.
#[derive(Clone, Debug, Default)]
pub struct QueryDesc {
    /// Included components with access modes; no duplicates.
    pub with_terms: Vec<QueryTerm>,
    /// Excluded components; no duplicates, disjoint from `with_terms`.
    pub without: Vec<ComponentId>,
}

impl QueryDesc {
    /// Creates an empty description.
    pub fn new() -> QueryDesc {
        QueryDesc::default()
    }

    /// Declares read access to a component.
    pub fn read(mut self, component_id: ComponentId) -> QueryDesc {
        self.with_terms.push(QueryTerm {
            component_id,
            access: Access::Read,
        });
        self
    }

    /// Declares write access to a component.
    pub fn write(mut self, component_id: ComponentId) -> QueryDesc {
        self.with_terms.push(QueryTerm {
            component_id,
            access: Access::Write,
        });
        self
    }

    /// Excludes a component from matching archetypes.
    pub fn without(mut self, component_id: ComponentId) -> QueryDesc {
        self.without.push(component_id);
        self
    }
}

/// A compiled query with its cached archetype match list.
pub struct Query {
    pub(crate) world_id: u64,
    pub(crate) with_terms: Vec<QueryTerm>,
    pub(crate) without: Vec<ComponentId>,
    pub(crate) matches: Vec<ArchetypeId>,
}

impl Query {
    /// Included terms in declaration order.
    pub fn with_terms(&self) -> &[QueryTerm] {
        &self.with_terms
    }

    /// Excluded component ids.
    pub fn without(&self) -> &[ComponentId] {
        &self.without
    }

    /// Archetypes matched at the last refresh.
    pub fn match_count(&self) -> u32 {
        self.matches.len() as u32
    }

    fn matches_archetype(&self, world: &World, archetype_id: ArchetypeId) -> bool {
        let archetype = world.archetypes.get(archetype_id);
        self.with_terms
            .iter()
            .all(|term| archetype.contains(term.component_id))
            && self.without.iter().all(|&id| !archetype.contains(id))
    }
}

/// The iteration payload: one chunk's entities and column pointers.
///
/// Column *i* addresses the column of `with_terms[i]`; tags and other empty
/// components yield null. The typed accessors are unsafe because the view
/// cannot prove the caller's element type or that two columns do not alias.
#[derive(Clone, Copy)]
pub struct ChunkView<'a> {
    count: u32,
    entities: &'a [Entity],
    columns: &'a [*mut u8],
}

impl<'a> ChunkView<'a> {
    pub(crate) fn new(count: u32, entities: &'a [Entity], columns: &'a [*mut u8]) -> ChunkView<'a> {
        ChunkView {
            count,
            entities,
            columns,
        }
    }

    /// Live rows in this chunk.
    #[inline]
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Entity handles of the live rows.
    #[inline]
    pub fn entities(&self) -> &'a [Entity] {
        self.entities
    }

    /// Number of columns (one per included query term).
    #[inline]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Raw base pointer of column `index`; null for empty components.
    #[inline]
    pub fn column_ptr(&self, index: usize) -> *mut u8 {
        self.columns[index]
    }

    /// Column `index` as a typed slice of the live rows.
    ///
    /// ## Safety
    /// `T` must match the registered layout of the term's component, and the
    /// column must not be concurrently written.
    #[inline]
    pub unsafe fn column<T>(&self, index: usize) -> &'a [T] {
        let ptr = self.columns[index] as *const T;
        if ptr.is_null() || self.count == 0 {
            return &[];
        }
        unsafe { core::slice::from_raw_parts(ptr, self.count as usize) }
    }

    /// Column `index` as a mutable typed slice of the live rows.
    ///
    /// ## Safety
    /// As [`column`](Self::column), and the caller must hold the only access
    /// to this column (the term was declared `Write` and no other view of
    /// the chunk is active).
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn column_mut<T>(&self, index: usize) -> &'a mut [T] {
        let ptr = self.columns[index] as *mut T;
        if ptr.is_null() || self.count == 0 {
            return &mut [];
        }
        unsafe { core::slice::from_raw_parts_mut(ptr, self.count as usize) }
    }
}

/// In-flight iteration state over a query's matched chunks.
pub struct QueryIter<'a> {
    world: &'a World,
    query: &'a Query,
    archetype_cursor: usize,
    chunk_cursor: usize,
    columns: Vec<*mut u8>,
    finished: bool,
}

impl<'a> QueryIter<'a> {
    /// Produces the next non-empty chunk, or `Ok(None)` once exhausted.
    /// Post-exhaustion calls keep returning `Ok(None)`.
    ///
    /// ## Errors
    /// `Conflict` when a matched archetype no longer carries an included
    /// column (storage corruption); the iterator finishes and the end event
    /// records the conflict.
    pub fn next_chunk(&mut self) -> EcsResult<Option<ChunkView<'_>>> {
        if self.finished {
            return Ok(None);
        }

        let world = self.world;
        let query = self.query;

        while self.archetype_cursor < query.matches.len() {
            let archetype_id = query.matches[self.archetype_cursor];
            let archetype = world.archetypes.get(archetype_id);
            let chunks = archetype.chunks();

            // Skip empty chunks within the current archetype.
            while self.chunk_cursor < chunks.len() && chunks[self.chunk_cursor].count() == 0 {
                self.chunk_cursor += 1;
            }

            if self.chunk_cursor == chunks.len() {
                self.archetype_cursor += 1;
                self.chunk_cursor = 0;
                continue;
            }

            let chunk = &chunks[self.chunk_cursor];
            for (index, term) in query.with_terms.iter().enumerate() {
                let Some(column_index) = archetype.find_component_index(term.component_id)
                else {
                    self.finished = true;
                    world.emit(
                        TraceEventKind::QueryIterEnd,
                        Some(EcsError::Conflict),
                        Entity::NULL,
                        ComponentId::INVALID,
                        query.match_count(),
                    );
                    return Err(EcsError::Conflict);
                };
                self.columns[index] = chunk.column_base(column_index);
            }

            self.chunk_cursor += 1;
            if self.chunk_cursor == chunks.len() {
                self.archetype_cursor += 1;
                self.chunk_cursor = 0;
            }

            world.emit(
                TraceEventKind::QueryIterChunk,
                None,
                Entity::NULL,
                ComponentId::INVALID,
                chunk.count(),
            );
            return Ok(Some(ChunkView::new(
                chunk.count(),
                chunk.entities(),
                &self.columns,
            )));
        }

        self.finished = true;
        world.emit(
            TraceEventKind::QueryIterEnd,
            None,
            Entity::NULL,
            ComponentId::INVALID,
            query.match_count(),
        );
        Ok(None)
    }
}

impl World {
    /// Compiles a query against this world.
    ///
    /// ## Errors
    /// - `NotFound` when a referenced component id is invalid or out of
    ///   range.
    /// - `Conflict` for duplicated terms or overlap between the include and
    ///   exclude sets.
    pub fn query_create(&self, desc: &QueryDesc) -> EcsResult<Query> {
        for (index, term) in desc.with_terms.iter().enumerate() {
            if !term.component_id.is_valid() || !self.components.contains(term.component_id) {
                return Err(EcsError::NotFound);
            }
            if desc.with_terms[index + 1..]
                .iter()
                .any(|other| other.component_id == term.component_id)
            {
                return Err(EcsError::Conflict);
            }
        }

        for (index, &component_id) in desc.without.iter().enumerate() {
            if !component_id.is_valid() || !self.components.contains(component_id) {
                return Err(EcsError::NotFound);
            }
            if desc.without[index + 1..].contains(&component_id) {
                return Err(EcsError::Conflict);
            }
            if desc
                .with_terms
                .iter()
                .any(|term| term.component_id == component_id)
            {
                return Err(EcsError::Conflict);
            }
        }

        let mut query = Query {
            world_id: self.world_id,
            with_terms: desc.with_terms.clone(),
            without: desc.without.clone(),
            matches: Vec::new(),
        };
        self.refresh_matches(&mut query);
        Ok(query)
    }

    /// Rebuilds the query's cached archetype match list.
    pub fn query_refresh(&self, query: &mut Query) -> EcsResult<()> {
        if query.world_id != self.world_id {
            return Err(EcsError::InvalidArgument);
        }
        self.refresh_matches(query);
        Ok(())
    }

    fn refresh_matches(&self, query: &mut Query) {
        query.matches.clear();
        for (archetype_id, _) in self.archetypes.iter() {
            if query.matches_archetype(self, archetype_id) {
                query.matches.push(archetype_id);
            }
        }
    }

    /// Refreshes the query and begins a chunk iteration over it.
    pub fn query_iter_begin<'a>(&'a self, query: &'a mut Query) -> EcsResult<QueryIter<'a>> {
        if query.world_id != self.world_id {
            return Err(EcsError::InvalidArgument);
        }
        self.refresh_matches(query);
        self.emit(
            TraceEventKind::QueryIterBegin,
            None,
            Entity::NULL,
            ComponentId::INVALID,
            query.match_count(),
        );

        let columns = vec![core::ptr::null_mut(); query.with_terms.len()];
        Ok(QueryIter {
            world: self,
            query,
            archetype_cursor: 0,
            chunk_cursor: 0,
            columns,
            finished: false,
        })
    }
}
