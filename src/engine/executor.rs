//! Parallel chunk executor: fan one query's chunks out to N workers.
//!
//! The executor refreshes the query, gathers every matching non-empty chunk
//! into a task list, and invokes the callback once per chunk. With one worker
//! the callback runs serially on the caller thread, equivalent to the
//! iterator, with no pool involved. With more workers the tasks are
//! distributed over a dedicated thread pool; callbacks may run on any worker
//! in any order, but no chunk is handed to two callbacks.
//!
//! The **set** of chunks and each chunk's contents are a deterministic
//! function of world state; only the interleaving varies with the worker
//! count. A callback that touches nothing beyond its own chunk's columns
//! therefore produces identical results at any worker count.
//!
//! Workers read and write chunk payloads only; archetype topology, the
//! entity index, and the deferred queue are never touched from worker
//! threads.

use rayon::prelude::*;

use crate::engine::error::{EcsError, EcsResult};
use crate::engine::query::{ChunkView, Query};
use crate::engine::types::Entity;
use crate::engine::world::World;

/// Everything a worker needs to rebuild one chunk's view.
struct ChunkTask {
    count: u32,
    entities: *const Entity,
    columns: Vec<*mut u8>,
}

impl ChunkTask {
    fn view(&self) -> ChunkView<'_> {
        // SAFETY: the pointers were captured under a shared world borrow that
        // outlives the executor call; counts match the chunk's live rows.
        let entities =
            unsafe { core::slice::from_raw_parts(self.entities, self.count as usize) };
        ChunkView::new(self.count, entities, &self.columns)
    }
}

// Tasks carry raw pointers into chunk storage. Distinct tasks address
// distinct chunks, and the callback contract confines each invocation to its
// own chunk's columns.
unsafe impl Send for ChunkTask {}
unsafe impl Sync for ChunkTask {}

pub(crate) fn for_each_chunk_parallel<F>(
    world: &World,
    query: &mut Query,
    worker_count: u32,
    callback: F,
) -> EcsResult<()>
where
    F: Fn(&ChunkView<'_>, u32) + Send + Sync,
{
    if worker_count == 0 {
        return Err(EcsError::InvalidArgument);
    }
    if query.world_id != world.world_id {
        return Err(EcsError::InvalidArgument);
    }
    if world.defer_depth > 0 {
        return Err(EcsError::Conflict);
    }

    world.query_refresh(query)?;

    let mut tasks: Vec<ChunkTask> = Vec::new();
    for &archetype_id in &query.matches {
        let archetype = world.archetypes.get(archetype_id);

        let mut column_indices = Vec::with_capacity(query.with_terms.len());
        for term in &query.with_terms {
            let Some(index) = archetype.find_component_index(term.component_id) else {
                return Err(EcsError::Conflict);
            };
            column_indices.push(index);
        }

        for chunk in archetype.chunks() {
            if chunk.count() == 0 {
                continue;
            }
            tasks.push(ChunkTask {
                count: chunk.count(),
                entities: chunk.entities().as_ptr(),
                columns: column_indices
                    .iter()
                    .map(|&index| chunk.column_base(index))
                    .collect(),
            });
        }
    }

    if worker_count == 1 {
        for task in &tasks {
            callback(&task.view(), 0);
        }
        return Ok(());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(worker_count as usize)
        .build()
        .map_err(|_| EcsError::AllocationFailed)?;

    pool.install(|| {
        tasks.par_iter().for_each(|task| {
            let worker_index = rayon::current_thread_index().unwrap_or(0) as u32;
            callback(&task.view(), worker_index);
        });
    });

    Ok(())
}

impl World {
    /// Runs `callback` once per matching non-empty chunk, fanned out over
    /// `worker_count` workers.
    ///
    /// ## Errors
    /// - `InvalidArgument` for zero workers or a query from another world.
    /// - `Conflict` while a defer scope is open, or when a matched archetype
    ///   lost an included column.
    pub fn for_each_chunk_parallel<F>(
        &self,
        query: &mut Query,
        worker_count: u32,
        callback: F,
    ) -> EcsResult<()>
    where
        F: Fn(&ChunkView<'_>, u32) + Send + Sync,
    {
        for_each_chunk_parallel(self, query, worker_count, callback)
    }
}
