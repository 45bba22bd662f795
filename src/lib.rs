//! # Lattice
//!
//! In-process, single-world Entity-Component-System runtime built around
//! archetype-chunked, structure-of-arrays storage.
//!
//! ## Design goals
//! - Archetype-chunked storage for cache-friendly, column-parallel sweeps
//! - Generation-safe entity handles over a free-listed slot table
//! - Deterministic, allocator-aware structural changes with deferred
//!   command replay
//! - Conflict-aware parallel scheduling with topological batching
//! - Total, status-returning operations; nothing panics on bad input
//!
//! ## Quick tour
//! ```
//! use lattice::prelude::*;
//!
//! #[derive(Clone, Copy)]
//! struct Position([f32; 3]);
//!
//! let mut world = World::new(None).unwrap();
//! let position = world
//!     .register_component(&ComponentDesc::of::<Position>("Position"))
//!     .unwrap();
//!
//! let e = world.entity_create().unwrap();
//! world
//!     .add_component_value(e, position, Position([1.0, 2.0, 3.0]))
//!     .unwrap();
//!
//! let mut query = world
//!     .query_create(&QueryDesc::new().write(position))
//!     .unwrap();
//! let mut iter = world.query_iter_begin(&mut query).unwrap();
//! while let Some(view) = iter.next_chunk().unwrap() {
//!     let positions = unsafe { view.column_mut::<Position>(0) };
//!     for value in positions {
//!         value.0[1] += 1.0;
//!     }
//! }
//! ```

#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod engine;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (Public API)
// ─────────────────────────────────────────────────────────────────────────────

// Core world types

pub use engine::world::{World, WorldConfig};

pub use engine::types::{
    Access, ArchetypeId, ChunkId, ComponentFlags, ComponentId, Entity, Row,
    DEFAULT_CHUNK_BYTES, MAX_ROWS_PER_CHUNK,
};

pub use engine::alloc::{AllocFn, AllocatorConfig, FreeFn};

pub use engine::component::{
    ComponentCtorFn, ComponentDesc, ComponentDtorFn, ComponentMoveFn,
};

pub use engine::error::{status_string, EcsError, EcsResult};

pub use engine::query::{ChunkView, Query, QueryDesc, QueryIter, QueryTerm};

pub use engine::scheduler::{
    schedule_execute_oneshot, Schedule, ScheduleCallback, ScheduleEntry, ScheduleStats,
};

pub use engine::trace::{TraceEvent, TraceEventKind, TraceHook, WorldStats};

// ─────────────────────────────────────────────────────────────────────────────
// Prelude (Optional but recommended)
// ─────────────────────────────────────────────────────────────────────────────

/// Commonly used types.
///
/// Import with:
/// ```rust
/// use lattice::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Access, ChunkView, ComponentDesc, ComponentFlags, ComponentId, EcsError, EcsResult,
        Entity, Query, QueryDesc, Schedule, ScheduleEntry, ScheduleStats, World, WorldConfig,
    };
}
