//! PstreamError: unified error type for communicator management and collectives.
//!
//! Configuration mistakes (unsorted member lists, double frees, a world
//! communicator that did not come back at its expected index) are reported as
//! errors carrying the offending call and values. They indicate a bug in the
//! caller and are classified by [`PstreamError::is_fatal`]; the application
//! entry point is expected to abort on them. Lookup misses (a rank that is not
//! a member of a communicator) are plain `None` values, never errors.

use thiserror::Error;

/// Unified error type for pstream operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PstreamError {
    /// A communicator was requested with no members.
    #[error("allocate: empty member list when allocating from parent {parent:?}")]
    EmptyMembers { parent: Option<usize> },
    /// Member ranks must be strictly increasing so that the position in the
    /// list is the rank in the new communicator.
    #[error(
        "allocate: member ranks not sorted {members:?} when allocating sub-communicator from parent {parent:?}"
    )]
    UnsortedMembers {
        parent: Option<usize>,
        members: Vec<usize>,
    },
    /// The index does not name a communicator slot.
    #[error("communicator {0} does not exist")]
    InvalidCommunicator(usize),
    /// The index names a slot that is already on the free list.
    #[error("free: communicator {0} is already free")]
    DoubleFree(usize),
    /// A rank outside `0..size` of the given communicator.
    #[error("rank {rank} out of range for communicator {comm} of size {size}")]
    InvalidRank { comm: usize, rank: usize, size: usize },
    /// `set_par_run` reallocated the world communicator at the wrong index.
    #[error("set_par_run: reallocated communicator {got} but world communicator is {expected}")]
    WorldIndexMismatch { expected: usize, got: usize },
    /// World names/ids are inconsistent.
    #[error("invalid worlds: {0}")]
    InvalidWorlds(String),
    /// World id out of range.
    #[error("unknown world id {0}")]
    UnknownWorld(usize),
    /// Unrecognised communication type name.
    #[error("unknown comms type `{0}` (expected blocking, scheduled or nonBlocking)")]
    UnknownCommsType(String),
    /// Received payload does not have the expected byte length.
    #[error("expected {expected} bytes from rank {from}, got {actual}")]
    BufferSizeMismatch {
        from: usize,
        expected: usize,
        actual: usize,
    },
    /// The calling process is not a member of the communicator.
    #[error("this process is not a member of communicator {0}")]
    NotAMember(usize),
    /// A list argument does not match the communicator size.
    #[error("list of length {len} does not match communicator {comm} of size {size}")]
    ListSizeMismatch { comm: usize, len: usize, size: usize },
    /// Bad configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Internal bookkeeping no longer satisfies its invariants.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    /// Failure inside the native transport.
    #[error("transport error: {0}")]
    Transport(String),
}

impl PstreamError {
    /// True for errors that indicate a programming bug in the caller and
    /// must terminate the run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PstreamError::EmptyMembers { .. }
                | PstreamError::UnsortedMembers { .. }
                | PstreamError::DoubleFree(_)
                | PstreamError::WorldIndexMismatch { .. }
                | PstreamError::InvalidCommunicator(_)
                | PstreamError::InvariantViolation(_)
        )
    }
}
