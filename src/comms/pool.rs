//! Arena of communicator records with LIFO slot reuse.
//!
//! Every communicator is a slot in a `Vec`; its index is the handle used by
//! every other call. Freed slots go on a stack and the most recently freed
//! index is handed out first, so index assignment depends only on the order
//! of allocate/free calls. All processes of a run must issue those calls in
//! the same order because the indices double as collective identifiers.
//!
//! The pool is `!Sync` (schedule caches are `unsync::OnceCell`). One thread
//! drives communication per process.

use crate::comms::schedule::{CommsStruct, ScheduleKind};
use crate::debug_invariants::DebugInvariants;
use crate::pstream_error::PstreamError;
use itertools::Itertools;
use once_cell::unsync::OnceCell;

/// One live communicator.
#[derive(Clone, Debug)]
pub struct CommunicatorRecord {
    parent: Option<usize>,
    /// Ranks in the parent's numbering (absolute ranks without a parent).
    members: Vec<usize>,
    local_rank: Option<usize>,
    /// Registered with the transport; only attached records are detached.
    attached: bool,
    /// Lazily built per-rank schedules, one slot per member.
    linear: Vec<OnceCell<CommsStruct>>,
    tree: Vec<OnceCell<CommsStruct>>,
}

impl CommunicatorRecord {
    fn new(parent: Option<usize>, members: Vec<usize>) -> Self {
        let n = members.len();
        Self {
            parent,
            members,
            // Provisional; the transport attach step overwrites it.
            local_rank: Some(0),
            attached: false,
            linear: vec![OnceCell::new(); n],
            tree: vec![OnceCell::new(); n],
        }
    }

    #[inline]
    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    #[inline]
    pub fn members(&self) -> &[usize] {
        &self.members
    }

    /// This process' rank, `None` if it is not a member.
    #[inline]
    pub fn local_rank(&self) -> Option<usize> {
        self.local_rank
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.members.len()
    }

    #[inline]
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub(crate) fn cache(&self, kind: ScheduleKind) -> &[OnceCell<CommsStruct>] {
        match kind {
            ScheduleKind::Linear => &self.linear,
            ScheduleKind::Tree => &self.tree,
        }
    }

    /// Number of schedule slots already built for `kind`.
    pub fn cached_schedules(&self, kind: ScheduleKind) -> usize {
        self.cache(kind).iter().filter(|c| c.get().is_some()).count()
    }
}

/// Process-local table of communicators.
#[derive(Clone, Debug, Default)]
pub struct CommunicatorPool {
    slots: Vec<Option<CommunicatorRecord>>,
    free: Vec<usize>,
    pub(crate) debug: bool,
}

impl CommunicatorPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// A pool that logs every allocate/free/schedule build at debug level.
    pub fn with_debug(debug: bool) -> Self {
        Self {
            debug,
            ..Self::default()
        }
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    /// Create a communicator of `members` (ranks of `parent`, or absolute
    /// ranks when `parent` is `None`) and return its index.
    ///
    /// The new record reports local rank 0 until a transport attach step
    /// says otherwise; its schedule caches are sized but empty.
    ///
    /// # Errors
    /// - [`PstreamError::EmptyMembers`] if `members` is empty.
    /// - [`PstreamError::UnsortedMembers`] unless `members` is strictly
    ///   increasing (the position in the list is the rank in the new
    ///   communicator, so order and uniqueness are load-bearing).
    /// - [`PstreamError::InvalidCommunicator`] if `parent` is not live.
    /// - [`PstreamError::InvalidRank`] if a member is not a rank of `parent`.
    pub fn allocate(
        &mut self,
        parent: Option<usize>,
        members: Vec<usize>,
    ) -> Result<usize, PstreamError> {
        if members.is_empty() {
            return Err(PstreamError::EmptyMembers { parent });
        }
        if !members.iter().tuple_windows().all(|(a, b)| a < b) {
            return Err(PstreamError::UnsortedMembers { parent, members });
        }
        if let Some(p) = parent {
            let size = self.size(p)?;
            if let Some(&bad) = members.iter().find(|&&m| m >= size) {
                return Err(PstreamError::InvalidRank {
                    comm: p,
                    rank: bad,
                    size,
                });
            }
        }

        let index = match self.free.pop() {
            Some(i) => i,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        };
        crate::cond_debug!(self.debug;
            "Communicators : Allocating communicator {index} parent: {parent:?} procs: {members:?}");
        self.slots[index] = Some(CommunicatorRecord::new(parent, members));
        self.debug_assert_invariants();
        Ok(index)
    }

    /// Release `index`: drop its member list and cached schedules and make
    /// the slot the next one [`allocate`](Self::allocate) hands out.
    ///
    /// # Errors
    /// [`PstreamError::DoubleFree`] if the slot is already free,
    /// [`PstreamError::InvalidCommunicator`] if it never existed.
    pub fn free(&mut self, index: usize) -> Result<(), PstreamError> {
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(PstreamError::InvalidCommunicator(index))?;
        if slot.take().is_none() {
            return Err(PstreamError::DoubleFree(index));
        }
        crate::cond_debug!(self.debug; "Communicators : Freeing communicator {index}");
        self.free.push(index);
        self.debug_assert_invariants();
        Ok(())
    }

    /// Free every live communicator and return the indices in the order
    /// they were freed.
    ///
    /// Highest index first, so the free list ends with index 0 on top and a
    /// fresh sequence of allocations gets back the original indices.
    pub fn free_all(&mut self) -> Vec<usize> {
        let live: Vec<usize> = self.live_indices().rev().collect();
        for &i in &live {
            if let Some(slot) = self.slots.get_mut(i) {
                *slot = None;
                self.free.push(i);
            }
        }
        crate::cond_debug!(self.debug; "Communicators : Freed communicators {live:?}");
        self.debug_assert_invariants();
        live
    }

    /// Record the rank the transport assigned to this process.
    pub fn set_local_rank(
        &mut self,
        index: usize,
        rank: Option<usize>,
    ) -> Result<(), PstreamError> {
        let rec = self.record_mut(index)?;
        if let Some(r) = rank {
            if r >= rec.size() {
                return Err(PstreamError::InvalidRank {
                    comm: index,
                    rank: r,
                    size: rec.size(),
                });
            }
        }
        rec.local_rank = rank;
        Ok(())
    }

    /// Record that the transport attached communicator `index`.
    pub fn mark_attached(&mut self, index: usize) -> Result<(), PstreamError> {
        self.record_mut(index)?.attached = true;
        Ok(())
    }

    pub fn is_attached(&self, index: usize) -> Result<bool, PstreamError> {
        Ok(self.record(index)?.is_attached())
    }

    pub fn record(&self, index: usize) -> Result<&CommunicatorRecord, PstreamError> {
        self.slots
            .get(index)
            .and_then(Option::as_ref)
            .ok_or(PstreamError::InvalidCommunicator(index))
    }

    fn record_mut(&mut self, index: usize) -> Result<&mut CommunicatorRecord, PstreamError> {
        self.slots
            .get_mut(index)
            .and_then(Option::as_mut)
            .ok_or(PstreamError::InvalidCommunicator(index))
    }

    #[inline]
    pub fn is_live(&self, index: usize) -> bool {
        matches!(self.slots.get(index), Some(Some(_)))
    }

    pub fn parent(&self, index: usize) -> Result<Option<usize>, PstreamError> {
        Ok(self.record(index)?.parent())
    }

    pub fn members(&self, index: usize) -> Result<&[usize], PstreamError> {
        Ok(self.record(index)?.members())
    }

    pub fn local_rank(&self, index: usize) -> Result<Option<usize>, PstreamError> {
        Ok(self.record(index)?.local_rank())
    }

    pub fn size(&self, index: usize) -> Result<usize, PstreamError> {
        Ok(self.record(index)?.size())
    }

    /// Indices of live communicators, ascending.
    pub fn live_indices(&self) -> impl DoubleEndedIterator<Item = usize> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| i))
    }

    /// Free slots; the last entry is reused first.
    #[inline]
    pub fn free_list(&self) -> &[usize] {
        &self.free
    }

    /// Number of slots ever created.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl DebugInvariants for CommunicatorPool {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "CommunicatorPool invalid");
    }

    fn validate_invariants(&self) -> Result<(), PstreamError> {
        let mut on_free_list = vec![false; self.slots.len()];
        for &i in &self.free {
            match self.slots.get(i) {
                Some(None) if !on_free_list[i] => on_free_list[i] = true,
                Some(None) => {
                    return Err(PstreamError::InvariantViolation(format!(
                        "index {i} appears twice on the free list"
                    )));
                }
                _ => {
                    return Err(PstreamError::InvariantViolation(format!(
                        "free list holds live or unknown index {i}"
                    )));
                }
            }
        }
        for (i, slot) in self.slots.iter().enumerate() {
            match slot {
                None if !on_free_list[i] => {
                    return Err(PstreamError::InvariantViolation(format!(
                        "free slot {i} is missing from the free list"
                    )));
                }
                None => {}
                Some(rec) => {
                    if rec.members.is_empty()
                        || !rec.members.iter().tuple_windows().all(|(a, b)| a < b)
                    {
                        return Err(PstreamError::InvariantViolation(format!(
                            "communicator {i} has members {:?}",
                            rec.members
                        )));
                    }
                    let n = rec.size();
                    if rec.linear.len() != n || rec.tree.len() != n {
                        return Err(PstreamError::InvariantViolation(format!(
                            "communicator {i} schedule caches not sized to {n}"
                        )));
                    }
                    if rec.local_rank.is_some_and(|r| r >= n) {
                        return Err(PstreamError::InvariantViolation(format!(
                            "communicator {i} local rank {:?} >= {n}",
                            rec.local_rank
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_allocations_extend_the_table() {
        let mut pool = CommunicatorPool::new();
        assert_eq!(pool.allocate(None, vec![0, 1, 2]).unwrap(), 0);
        assert_eq!(pool.allocate(Some(0), vec![0, 2]).unwrap(), 1);
        assert_eq!(pool.capacity(), 2);
        assert_eq!(pool.members(1).unwrap(), &[0, 2]);
        assert_eq!(pool.parent(1).unwrap(), Some(0));
        assert_eq!(pool.local_rank(1).unwrap(), Some(0));
        pool.validate_invariants().unwrap();
    }

    #[test]
    fn reuse_is_lifo() {
        let mut pool = CommunicatorPool::new();
        let a = pool.allocate(None, vec![0]).unwrap();
        let b = pool.allocate(None, vec![0]).unwrap();
        pool.free(a).unwrap();
        pool.free(b).unwrap();
        assert_eq!(pool.allocate(None, vec![0]).unwrap(), b);
        assert_eq!(pool.allocate(None, vec![0]).unwrap(), a);
        assert!(pool.free_list().is_empty());
    }

    #[test]
    fn free_clears_record() {
        let mut pool = CommunicatorPool::new();
        let c = pool.allocate(None, vec![0, 1]).unwrap();
        pool.free(c).unwrap();
        assert!(!pool.is_live(c));
        assert_eq!(pool.members(c), Err(PstreamError::InvalidCommunicator(c)));
        assert_eq!(pool.free_list(), &[c]);
    }

    #[test]
    fn double_free_is_rejected() {
        let mut pool = CommunicatorPool::new();
        let c = pool.allocate(None, vec![0]).unwrap();
        pool.free(c).unwrap();
        assert_eq!(pool.free(c), Err(PstreamError::DoubleFree(c)));
        assert_eq!(pool.free(42), Err(PstreamError::InvalidCommunicator(42)));
        // The failed free did not push a second copy.
        assert_eq!(pool.free_list(), &[c]);
    }

    #[test]
    fn bad_member_lists() {
        let mut pool = CommunicatorPool::new();
        assert_eq!(
            pool.allocate(None, vec![]),
            Err(PstreamError::EmptyMembers { parent: None })
        );
        assert!(matches!(
            pool.allocate(None, vec![0, 2, 2]),
            Err(PstreamError::UnsortedMembers { .. })
        ));
        assert!(matches!(
            pool.allocate(None, vec![3, 1]),
            Err(PstreamError::UnsortedMembers { .. })
        ));
        let w = pool.allocate(None, vec![0, 1, 2, 3]).unwrap();
        assert_eq!(
            pool.allocate(Some(w), vec![1, 4]),
            Err(PstreamError::InvalidRank {
                comm: w,
                rank: 4,
                size: 4
            })
        );
        assert_eq!(
            pool.allocate(Some(9), vec![0]),
            Err(PstreamError::InvalidCommunicator(9))
        );
        // Nothing leaked into the table.
        assert_eq!(pool.capacity(), 1);
    }

    #[test]
    fn free_all_releases_live_only() {
        let mut pool = CommunicatorPool::new();
        for _ in 0..4 {
            pool.allocate(None, vec![0]).unwrap();
        }
        pool.free(2).unwrap();
        assert_eq!(pool.free_all(), vec![3, 1, 0]);
        assert_eq!(pool.live_indices().count(), 0);
        pool.validate_invariants().unwrap();
        assert_eq!(pool.allocate(None, vec![0]).unwrap(), 0);
        assert_eq!(pool.allocate(None, vec![0]).unwrap(), 1);
    }

    #[test]
    fn attached_flag_is_per_allocation() {
        let mut pool = CommunicatorPool::new();
        let c = pool.allocate(None, vec![0, 1]).unwrap();
        assert!(!pool.is_attached(c).unwrap());
        pool.mark_attached(c).unwrap();
        assert!(pool.is_attached(c).unwrap());
        pool.free(c).unwrap();
        let d = pool.allocate(None, vec![0]).unwrap();
        assert_eq!(c, d);
        assert!(!pool.is_attached(d).unwrap());
    }

    #[test]
    fn local_rank_must_fit() {
        let mut pool = CommunicatorPool::new();
        let c = pool.allocate(None, vec![0, 1]).unwrap();
        pool.set_local_rank(c, None).unwrap();
        assert_eq!(pool.local_rank(c).unwrap(), None);
        assert!(matches!(
            pool.set_local_rank(c, Some(2)),
            Err(PstreamError::InvalidRank { .. })
        ));
    }
}
