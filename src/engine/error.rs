//! Status taxonomy shared by every fallible engine operation.
//!
//! Failures are modeled as a single flat enum so callers can match on the
//! failure kind for control flow or log the stable status string. Success is
//! the `Ok` arm of [`EcsResult`]; diagnostic payloads that want to record a
//! possibly-successful outcome use `Option<EcsError>` with `None` standing
//! for success.
//!
//! ## Goals
//! * **Totality:** every operation returns a status; nothing panics or
//!   aborts on bad input.
//! * **Stability:** [`EcsError::as_str`] yields fixed strings suitable for
//!   logs and telemetry.
//! * **Propagation:** failures bubble unchanged via `?`; the engine never
//!   retries and never swallows an error.

use std::fmt;

/// Failure kinds returned by engine operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EcsError {
    /// A required argument was null, malformed, or out of its documented range.
    InvalidArgument,
    /// A component id, name, or attachment was not present.
    NotFound,
    /// A unique name or attachment already exists.
    AlreadyExists,
    /// An internal counter or reserved limit would be exceeded.
    CapacityReached,
    /// The allocator hook declined the request.
    AllocationFailed,
    /// The entity handle's slot is out of range, free, or generation-mismatched.
    StaleEntity,
    /// The operation conflicts with current state (open defer scope, overlapping
    /// query terms, mixed-world schedule input, or corrupted storage discovered
    /// mid-iteration).
    Conflict,
    /// Reserved for future extension.
    NotImplemented,
}

impl EcsError {
    /// Stable, log-friendly name for this status.
    pub const fn as_str(self) -> &'static str {
        match self {
            EcsError::InvalidArgument => "invalid argument",
            EcsError::NotFound => "not found",
            EcsError::AlreadyExists => "already exists",
            EcsError::CapacityReached => "capacity reached",
            EcsError::AllocationFailed => "allocation failed",
            EcsError::StaleEntity => "stale entity",
            EcsError::Conflict => "conflict",
            EcsError::NotImplemented => "not implemented",
        }
    }
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for EcsError {}

/// Result alias used across the engine.
pub type EcsResult<T> = Result<T, EcsError>;

/// Stable string for a recorded status, where `None` denotes success.
pub const fn status_string(status: Option<EcsError>) -> &'static str {
    match status {
        None => "ok",
        Some(error) => error.as_str(),
    }
}
