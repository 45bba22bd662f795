//! Deferred structural commands and their FIFO queue.
//!
//! While a defer scope is open, structural edits are recorded here instead of
//! touching storage. Each command is one arm of a closed sum type; the add
//! arm owns a payload buffer copied from the caller's bytes at enqueue time,
//! so the caller's buffer may be reused immediately. Payloads release their
//! storage on drop whether the command is applied, discarded after a failed
//! flush, or torn down with the world.

use crate::engine::alloc::{Allocator, RawBuffer};
use crate::engine::error::EcsResult;
use crate::engine::types::{ComponentId, Entity};

/// Owned copy of a component's initial bytes, allocated with the component's
/// live size and alignment.
pub(crate) struct Payload {
    buf: RawBuffer,
}

impl Payload {
    pub(crate) fn copy_from(allocator: Allocator, bytes: &[u8], align: u32) -> EcsResult<Payload> {
        let buf = RawBuffer::alloc(allocator, bytes.len(), align as usize)?;
        // SAFETY: the buffer was just allocated with exactly `bytes.len()` bytes.
        unsafe { core::ptr::copy_nonoverlapping(bytes.as_ptr(), buf.as_ptr(), bytes.len()) };
        Ok(Payload { buf })
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        if self.buf.is_empty() {
            return &[];
        }
        // SAFETY: the buffer owns `size` initialized bytes.
        unsafe { core::slice::from_raw_parts(self.buf.as_ptr(), self.buf.size()) }
    }
}

/// One queued structural edit.
pub(crate) enum DeferredOp {
    AddComponent {
        entity: Entity,
        component_id: ComponentId,
        payload: Option<Payload>,
    },
    RemoveComponent {
        entity: Entity,
        component_id: ComponentId,
    },
    DestroyEntity {
        entity: Entity,
    },
}

impl DeferredOp {
    /// Stable numeric tag recorded in trace events.
    pub(crate) fn kind_code(&self) -> u32 {
        match self {
            DeferredOp::AddComponent { .. } => 1,
            DeferredOp::RemoveComponent { .. } => 2,
            DeferredOp::DestroyEntity { .. } => 3,
        }
    }

    pub(crate) fn entity(&self) -> Entity {
        match self {
            DeferredOp::AddComponent { entity, .. }
            | DeferredOp::RemoveComponent { entity, .. }
            | DeferredOp::DestroyEntity { entity } => *entity,
        }
    }

    pub(crate) fn component_id(&self) -> ComponentId {
        match self {
            DeferredOp::AddComponent { component_id, .. }
            | DeferredOp::RemoveComponent { component_id, .. } => *component_id,
            DeferredOp::DestroyEntity { .. } => ComponentId::INVALID,
        }
    }
}

/// FIFO of pending commands.
pub(crate) struct CommandQueue {
    ops: Vec<DeferredOp>,
}

impl CommandQueue {
    pub(crate) fn new() -> CommandQueue {
        CommandQueue { ops: Vec::new() }
    }

    #[inline]
    pub(crate) fn len(&self) -> u32 {
        self.ops.len() as u32
    }

    pub(crate) fn push(&mut self, op: DeferredOp) {
        self.ops.push(op);
    }

    /// Takes the whole queue for replay, leaving it empty. Unapplied commands
    /// (and their payloads) are released when the returned vector drops.
    pub(crate) fn take(&mut self) -> Vec<DeferredOp> {
        core::mem::take(&mut self.ops)
    }
}
