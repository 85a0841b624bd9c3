//! Rank translation between nested communicators.
//!
//! A sub-communicator renumbers its members `0..n` in the order of its
//! member list, and that list is expressed in the parent's numbering. Going
//! from a local rank to an absolute (top-level) rank therefore walks the
//! parent chain upwards, and the inverse walks it back down.

use crate::comms::pool::CommunicatorPool;
use crate::pstream_error::PstreamError;

impl CommunicatorPool {
    /// `comm` followed by its parent, grandparent, ... up to the top-level
    /// communicator.
    ///
    /// # Errors
    /// [`PstreamError::InvalidCommunicator`] if any link is not live, and
    /// [`PstreamError::InvariantViolation`] if the chain loops (possible when
    /// a parent was freed and its slot reused by a descendant).
    pub fn ancestry(&self, comm: usize) -> Result<Vec<usize>, PstreamError> {
        let mut chain = vec![comm];
        let mut cur = self.parent(comm)?;
        while let Some(p) = cur {
            if chain.len() > self.capacity() {
                return Err(PstreamError::InvariantViolation(format!(
                    "parent chain of communicator {comm} loops: {chain:?}"
                )));
            }
            chain.push(p);
            cur = self.parent(p)?;
        }
        Ok(chain)
    }

    /// Absolute rank of `local` rank of `comm`.
    ///
    /// A top-level communicator returns `local` unchanged.
    pub fn base_proc_no(&self, comm: usize, local: usize) -> Result<usize, PstreamError> {
        let mut id = local;
        let chain = self.ancestry(comm)?;
        // The root's member list is the absolute numbering itself.
        for &c in &chain[..chain.len() - 1] {
            let members = self.members(c)?;
            id = *members.get(id).ok_or(PstreamError::InvalidRank {
                comm: c,
                rank: id,
                size: members.len(),
            })?;
        }
        Ok(id)
    }

    /// Rank of absolute rank `absolute` inside `comm`, or `None` if it is
    /// not a member.
    pub fn proc_no(&self, comm: usize, absolute: usize) -> Result<Option<usize>, PstreamError> {
        let chain = self.ancestry(comm)?;
        let mut id = absolute;
        for &c in chain.iter().rev() {
            // Member lists are strictly increasing.
            match self.members(c)?.binary_search(&id) {
                Ok(pos) => id = pos,
                Err(_) => return Ok(None),
            }
        }
        Ok(Some(id))
    }

    /// Rank in `target` of rank `source_local` of `source`, or `None` if
    /// that process is not a member of `target`.
    pub fn proc_no_from(
        &self,
        target: usize,
        source: usize,
        source_local: usize,
    ) -> Result<Option<usize>, PstreamError> {
        let absolute = self.base_proc_no(source, source_local)?;
        self.proc_no(target, absolute)
    }
}
