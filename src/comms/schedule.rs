//! Per-rank routing plans for collective operations.
//!
//! A [`CommsStruct`] tells one rank whom it reports to during the gather
//! phase of a collective (`above`), whom it hears from directly (`below`) and
//! which ranks live in its subtree (`all_below`). Two shapes exist:
//!
//! - **linear**: every rank talks to rank 0 (a star). Cheap for small groups.
//! - **tree**: a binary combining tree with `ceil(log2(n))` levels. For 8
//!   ranks the levels are `0←1 2←3 4←5 6←7`, then `0←2 4←6`, then `0←4`.
//!
//! [`CommsStruct::build`] picks the shape from a size threshold: groups with
//! `n < threshold` ranks are linear, everything else is a tree.

use crate::comms::pool::CommunicatorPool;
use crate::pstream_error::PstreamError;
use serde::{Deserialize, Serialize};

/// Shape of a collective schedule.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScheduleKind {
    Linear,
    Tree,
}

/// Routing plan of a single rank inside a communicator of `n` ranks.
///
/// # Invariants
/// - `all_below` and `all_not_below` partition `0..n` minus this rank, so
///   `all_below.len() + all_not_below.len() + 1 == n`.
/// - `below ⊆ all_below`, both ascending.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommsStruct {
    above: Option<usize>,
    below: Vec<usize>,
    all_below: Vec<usize>,
    all_not_below: Vec<usize>,
}

impl CommsStruct {
    /// Assemble a plan for `rank` of `n`, deriving `all_not_below`.
    pub fn new(
        n: usize,
        rank: usize,
        above: Option<usize>,
        below: Vec<usize>,
        all_below: Vec<usize>,
    ) -> Self {
        let mut in_below = vec![false; n];
        for &r in &all_below {
            in_below[r] = true;
        }
        let all_not_below = (0..n).filter(|&r| r != rank && !in_below[r]).collect();
        Self {
            above,
            below,
            all_below,
            all_not_below,
        }
    }

    /// Which shape a communicator of `n` ranks uses for `threshold`.
    #[inline]
    pub fn kind_for(n: usize, threshold: usize) -> ScheduleKind {
        if n < threshold {
            ScheduleKind::Linear
        } else {
            ScheduleKind::Tree
        }
    }

    /// Threshold-selected plan for `rank` of `n`.
    pub fn build(n: usize, rank: usize, threshold: usize) -> Self {
        Self::of_kind(Self::kind_for(n, threshold), n, rank)
    }

    pub fn of_kind(kind: ScheduleKind, n: usize, rank: usize) -> Self {
        match kind {
            ScheduleKind::Linear => Self::linear(n, rank),
            ScheduleKind::Tree => Self::tree(n, rank),
        }
    }

    /// Star around rank 0.
    pub fn linear(n: usize, rank: usize) -> Self {
        debug_assert!(rank < n, "rank {rank} out of range for {n} ranks");
        if rank == 0 {
            let below: Vec<usize> = (1..n).collect();
            let all_below = below.clone();
            Self::new(n, rank, None, below, all_below)
        } else {
            Self::new(n, rank, Some(0), Vec::new(), Vec::new())
        }
    }

    /// Binary combining tree.
    ///
    /// At level `step` (1, 2, 4, ...) a rank that is not a multiple of
    /// `2*step` reports to the multiple below it and stops. Otherwise it
    /// hears from `rank+step, rank+2*step, ...` inside its window
    /// `[rank, rank+2*step)` and owns every rank of that window.
    pub fn tree(n: usize, rank: usize) -> Self {
        debug_assert!(rank < n, "rank {rank} out of range for {n} ranks");
        let mut above = None;
        let mut below = Vec::new();
        let mut all_below = Vec::new();

        let mut step = 1;
        while step < n {
            let modulus = step * 2;
            if rank % modulus != 0 {
                above = Some(rank - rank % modulus);
                break;
            }
            let end = n.min(rank + modulus);
            below.extend((rank + step..end).step_by(step));
            all_below.extend(rank + step..end);
            step = modulus;
        }
        Self::new(n, rank, above, below, all_below)
    }

    /// Rank this one sends to during a gather, `None` for the root.
    #[inline]
    pub fn above(&self) -> Option<usize> {
        self.above
    }

    #[inline]
    pub fn below(&self) -> &[usize] {
        &self.below
    }

    #[inline]
    pub fn all_below(&self) -> &[usize] {
        &self.all_below
    }

    #[inline]
    pub fn all_not_below(&self) -> &[usize] {
        &self.all_not_below
    }

    /// True once this plan describes a communicator of `n` ranks.
    #[inline]
    pub fn is_complete(&self, n: usize) -> bool {
        self.all_below.len() + self.all_not_below.len() + 1 == n
    }
}

impl CommunicatorPool {
    /// Plan of `rank` in communicator `comm`, shaped by `threshold`
    /// (linear below it, tree at or above it).
    ///
    /// Built on first request and cached in the communicator's slot for that
    /// rank; later calls return the cached plan. Freeing the communicator
    /// drops the cache.
    pub fn get_or_build_schedule(
        &self,
        comm: usize,
        rank: usize,
        threshold: usize,
    ) -> Result<&CommsStruct, PstreamError> {
        let n = self.size(comm)?;
        self.get_or_build_kind(comm, rank, CommsStruct::kind_for(n, threshold))
    }

    /// Star plan of `rank` regardless of the communicator size.
    pub fn linear_communication(
        &self,
        comm: usize,
        rank: usize,
    ) -> Result<&CommsStruct, PstreamError> {
        self.get_or_build_kind(comm, rank, ScheduleKind::Linear)
    }

    /// Tree plan of `rank` regardless of the communicator size.
    pub fn tree_communication(
        &self,
        comm: usize,
        rank: usize,
    ) -> Result<&CommsStruct, PstreamError> {
        self.get_or_build_kind(comm, rank, ScheduleKind::Tree)
    }

    pub fn get_or_build_kind(
        &self,
        comm: usize,
        rank: usize,
        kind: ScheduleKind,
    ) -> Result<&CommsStruct, PstreamError> {
        let rec = self.record(comm)?;
        let size = rec.size();
        let slot = rec
            .cache(kind)
            .get(rank)
            .ok_or(PstreamError::InvalidRank { comm, rank, size })?;
        Ok(slot.get_or_init(|| {
            crate::cond_debug!(self.debug;
                "Communicators : {kind:?} schedule for rank {rank} of communicator {comm} ({size} ranks)");
            CommsStruct::of_kind(kind, size, rank)
        }))
    }
}
