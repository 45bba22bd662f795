//! Schedule planning and execution: topological batching by access conflict.
//!
//! ## Scheduling model
//! The planner partitions an ordered list of `(query, callback)` entries into
//! batches such that:
//!
//! * entries within one batch have no access conflict with each other,
//! * an entry lands in a later batch than every earlier entry it conflicts
//!   with, so the batch order is a topological extension of the input order.
//!
//! Two entries conflict when their queries share a component id with a writer
//! on either side, or when one query includes a component the other excludes.
//! Read-read sharing does not conflict.
//!
//! ## Execution
//! Batches run in order with a barrier between them: every entry of batch
//! *i* completes before batch *i+1* starts. Each entry runs through the
//! parallel chunk executor, so a batch's chunk work is spread over the
//! requested worker count while conflicting entries stay ordered.
//!
//! A compiled [`Schedule`] caches its plan; [`schedule_execute_oneshot`]
//! replans on every call and suits occasional runs only.

use std::sync::Arc;

use crate::engine::error::{EcsError, EcsResult};
use crate::engine::executor;
use crate::engine::query::{ChunkView, Query};
use crate::engine::types::Access;
use crate::engine::world::World;

/// Chunk callback carried by a schedule entry.
pub type ScheduleCallback = Arc<dyn Fn(&ChunkView<'_>, u32) + Send + Sync>;

/// One schedulable unit: a query plus the callback run on its chunks.
pub struct ScheduleEntry {
    pub(crate) query: Query,
    pub(crate) callback: ScheduleCallback,
}

impl ScheduleEntry {
    /// Pairs a compiled query with its chunk callback.
    pub fn new<F>(query: Query, callback: F) -> ScheduleEntry
    where
        F: Fn(&ChunkView<'_>, u32) + Send + Sync + 'static,
    {
        ScheduleEntry {
            query,
            callback: Arc::new(callback),
        }
    }

    /// The entry's query.
    pub fn query(&self) -> &Query {
        &self.query
    }
}

/// Observable statistics of one batch plan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScheduleStats {
    /// Number of batches in the plan.
    pub batch_count: u32,
    /// Conflicting ordered entry pairs considered by the planner.
    pub edge_count: u32,
    /// Size of the largest batch.
    pub max_batch_size: u32,
}

/// A compiled schedule: entries plus their cached batch plan.
pub struct Schedule {
    world_id: u64,
    entries: Vec<ScheduleEntry>,
    batches: Vec<Vec<usize>>,
    stats: ScheduleStats,
}

impl Schedule {
    /// Plans a schedule over `entries` for `world`.
    ///
    /// ## Errors
    /// `InvalidArgument` when any entry's query belongs to another world.
    pub fn new(world: &World, entries: Vec<ScheduleEntry>) -> EcsResult<Schedule> {
        if entries
            .iter()
            .any(|entry| entry.query.world_id != world.world_id)
        {
            return Err(EcsError::InvalidArgument);
        }

        let (batches, stats) = plan(&entries);
        Ok(Schedule {
            world_id: world.world_id,
            entries,
            batches,
            stats,
        })
    }

    /// The cached plan's statistics.
    pub fn stats(&self) -> ScheduleStats {
        self.stats
    }

    /// Runs every batch in order through the parallel executor.
    ///
    /// ## Errors
    /// - `InvalidArgument` for zero workers or a foreign world.
    /// - `Conflict` while a defer scope is open.
    pub fn execute(&mut self, world: &World, worker_count: u32) -> EcsResult<ScheduleStats> {
        if worker_count == 0 || world.world_id != self.world_id {
            return Err(EcsError::InvalidArgument);
        }
        if world.defer_depth > 0 {
            return Err(EcsError::Conflict);
        }

        for batch in &self.batches {
            for &entry_index in batch {
                let callback = self.entries[entry_index].callback.clone();
                executor::for_each_chunk_parallel(
                    world,
                    &mut self.entries[entry_index].query,
                    worker_count,
                    move |view, worker| callback(view, worker),
                )?;
            }
        }

        Ok(self.stats)
    }

    /// Releases the schedule, returning its entries.
    pub fn into_entries(self) -> Vec<ScheduleEntry> {
        self.entries
    }
}

/// Plans and executes `entries` once, without caching the plan.
pub fn schedule_execute_oneshot(
    world: &World,
    entries: &mut [ScheduleEntry],
    worker_count: u32,
) -> EcsResult<ScheduleStats> {
    if worker_count == 0 {
        return Err(EcsError::InvalidArgument);
    }
    if entries
        .iter()
        .any(|entry| entry.query.world_id != world.world_id)
    {
        return Err(EcsError::InvalidArgument);
    }
    if world.defer_depth > 0 {
        return Err(EcsError::Conflict);
    }

    let (batches, stats) = plan(entries);
    for batch in &batches {
        for &entry_index in batch {
            let callback = entries[entry_index].callback.clone();
            executor::for_each_chunk_parallel(
                world,
                &mut entries[entry_index].query,
                worker_count,
                move |view, worker| callback(view, worker),
            )?;
        }
    }

    Ok(stats)
}

/// Returns whether two entries may not share a batch.
fn conflicts(a: &ScheduleEntry, b: &ScheduleEntry) -> bool {
    for term_a in &a.query.with_terms {
        for term_b in &b.query.with_terms {
            if term_a.component_id == term_b.component_id
                && (term_a.access == Access::Write || term_b.access == Access::Write)
            {
                return true;
            }
        }
    }

    // Cannot arise from well-formed queries against one world, but a query
    // including what another excludes still counts as a conflict.
    let with_hits_without = |x: &ScheduleEntry, y: &ScheduleEntry| {
        x.query
            .with_terms
            .iter()
            .any(|term| y.query.without.contains(&term.component_id))
    };
    with_hits_without(a, b) || with_hits_without(b, a)
}

/// Levels each entry one past its latest conflicting predecessor, then groups
/// by level. Entries sharing a level are pairwise conflict-free, and every
/// conflicting pair stays in input order across levels.
fn plan(entries: &[ScheduleEntry]) -> (Vec<Vec<usize>>, ScheduleStats) {
    let mut levels: Vec<u32> = Vec::with_capacity(entries.len());
    let mut edge_count = 0u32;

    for index in 0..entries.len() {
        let mut level = 0u32;
        for earlier in 0..index {
            if conflicts(&entries[earlier], &entries[index]) {
                edge_count += 1;
                level = level.max(levels[earlier] + 1);
            }
        }
        levels.push(level);
    }

    let batch_count = levels.iter().map(|&level| level + 1).max().unwrap_or(0);
    let mut batches: Vec<Vec<usize>> = vec![Vec::new(); batch_count as usize];
    for (index, &level) in levels.iter().enumerate() {
        batches[level as usize].push(index);
    }

    let max_batch_size = batches.iter().map(Vec::len).max().unwrap_or(0) as u32;
    let stats = ScheduleStats {
        batch_count,
        edge_count,
        max_batch_size,
    };
    (batches, stats)
}
