//! Serial/parallel mode, worlds and the world communicator.
//!
//! A [`ParallelState`] is created once per process. It owns the
//! communicator table, the transport and the tunables, and it is the only
//! place that flips the run between serial and parallel mode. The world
//! communicator always lives at index 0: [`ParallelState::new`] allocates a
//! one-rank serial world, and [`ParallelState::set_par_run`] frees it and
//! allocates the real one, which comes back at the same index because
//! freed slots are reused last-in first-out.
//!
//! The type is neither `Sync` nor internally locked. Every process drives
//! it from a single thread, in the same order as every other process.

use crate::comms::pool::CommunicatorPool;
use crate::comms::schedule::{CommsStruct, ScheduleKind};
use crate::comms::transport::{AttachRequest, NullTransport, Transport};
use crate::config::{CommsType, PstreamConfig};
use crate::pstream_error::PstreamError;
use std::ops::{Deref, DerefMut, Range};

pub struct ParallelState<T: Transport = NullTransport> {
    pool: CommunicatorPool,
    transport: T,
    config: PstreamConfig,
    par_run: bool,
    have_threads: bool,
    world_names: Vec<String>,
    /// World id of every rank of the world communicator.
    world_ids: Vec<usize>,
    world_comm: usize,
    msg_type: i32,
    /// Decoration for per-rank output, `"[rank] "` in parallel runs.
    prefix: String,
}

impl ParallelState<NullTransport> {
    /// Serial state with default tunables.
    pub fn serial() -> Result<Self, PstreamError> {
        Self::new(NullTransport, PstreamConfig::default())
    }
}

impl<T: Transport> ParallelState<T> {
    /// Serial state holding the one-rank world communicator `{0}`.
    pub fn new(transport: T, config: PstreamConfig) -> Result<Self, PstreamError> {
        let mut pool = CommunicatorPool::with_debug(config.debug);
        let world_comm = pool.allocate(None, vec![0])?;
        Ok(Self {
            pool,
            transport,
            msg_type: config.msg_type,
            config,
            par_run: false,
            have_threads: false,
            world_names: vec![String::new()],
            world_ids: vec![0],
            world_comm,
            prefix: String::new(),
        })
    }

    /// Switch the run to `n_procs` ranks (`0` means serial) and rebuild the
    /// world communicator to match.
    ///
    /// Meant to be called once at startup; calling it again tears the
    /// previous world communicator down first, cached schedules included.
    /// Worlds are reset to a single unnamed world covering every rank.
    ///
    /// # Errors
    /// [`PstreamError::WorldIndexMismatch`] if the world communicator did
    /// not come back at its fixed index (another communicator was freed
    /// after it). The misplaced communicator is released again and the run
    /// mode is left unchanged. Errors of the transport attach step are
    /// passed through.
    pub fn set_par_run(&mut self, n_procs: usize, have_threads: bool) -> Result<(), PstreamError> {
        if self.pool.is_live(self.world_comm) {
            self.free_communicator(self.world_comm, true)?;
        }

        let parallel = n_procs > 0;
        let members = if parallel {
            (0..n_procs).collect()
        } else {
            vec![0]
        };
        let comm = self.allocate_with(None, members, parallel)?;
        if comm != self.world_comm {
            self.free_communicator(comm, true)?;
            return Err(PstreamError::WorldIndexMismatch {
                expected: self.world_comm,
                got: comm,
            });
        }
        self.par_run = parallel;
        self.have_threads = have_threads;

        self.prefix = match (self.par_run, self.pool.local_rank(comm)?) {
            (true, Some(rank)) => format!("[{rank}] "),
            _ => String::new(),
        };
        self.world_names = vec![String::new()];
        self.world_ids = vec![0; n_procs.max(1)];

        crate::cond_debug!(self.config.debug;
            "{}set_par_run: parallel={} nProcs={} threads={}",
            self.prefix, self.par_run, n_procs.max(1), have_threads);
        Ok(())
    }

    /// Allocate a communicator and, when `attach` is set in a parallel run,
    /// register it with the transport, which supplies this process' rank.
    ///
    /// If the attach step fails the slot is released again before the
    /// error is returned.
    pub fn allocate_communicator(
        &mut self,
        parent: Option<usize>,
        members: Vec<usize>,
        attach: bool,
    ) -> Result<usize, PstreamError> {
        self.allocate_with(parent, members, attach && self.par_run)
    }

    fn allocate_with(
        &mut self,
        parent: Option<usize>,
        members: Vec<usize>,
        attach: bool,
    ) -> Result<usize, PstreamError> {
        let index = self.pool.allocate(parent, members)?;
        if attach {
            let parent_rank = match parent {
                Some(p) => self.pool.local_rank(p)?,
                None => None,
            };
            let attached = self.transport.attach(AttachRequest {
                index,
                parent,
                members: self.pool.members(index)?,
                parent_rank,
            });
            let rank = match attached {
                Ok(rank) => rank,
                Err(e) => {
                    self.pool.free(index)?;
                    return Err(e);
                }
            };
            self.pool.set_local_rank(index, rank)?;
            self.pool.mark_attached(index)?;
        }
        Ok(index)
    }

    /// Free communicator `index`, detaching it from the transport first
    /// when `detach` is set and it was attached when allocated.
    ///
    /// The slot is released even if the transport fails to detach; that
    /// error is returned afterwards.
    ///
    /// # Errors
    /// [`PstreamError::DoubleFree`] / [`PstreamError::InvalidCommunicator`]
    /// for slots that are not live, then any transport detach error.
    pub fn free_communicator(&mut self, index: usize, detach: bool) -> Result<(), PstreamError> {
        let detached = if detach && self.pool.is_live(index) && self.pool.is_attached(index)? {
            self.transport.detach(index)
        } else {
            Ok(())
        };
        self.pool.free(index)?;
        detached
    }

    /// Free every live communicator, highest index first.
    ///
    /// Every slot is released even if some detach fails; the first such
    /// error is returned at the end.
    pub fn free_communicators(&mut self, detach: bool) -> Result<(), PstreamError> {
        let live: Vec<usize> = self.pool.live_indices().rev().collect();
        let mut first_err = None;
        for index in live {
            if let Err(e) = self.free_communicator(index, detach) {
                log::error!("{}failed to free communicator {index}: {e}", self.prefix);
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Release everything at the end of a run.
    pub fn shutdown(&mut self) -> Result<(), PstreamError> {
        self.free_communicators(true)
    }

    /// Allocate a communicator that is freed when the guard goes out of
    /// scope.
    pub fn scoped(
        &mut self,
        parent: Option<usize>,
        members: Vec<usize>,
        attach: bool,
    ) -> Result<ScopedCommunicator<'_, T>, PstreamError> {
        let index = self.allocate_communicator(parent, members, attach)?;
        Ok(ScopedCommunicator {
            state: self,
            index,
            detach: attach,
        })
    }

    // ----- queries -----

    #[inline]
    pub fn is_parallel_run(&self) -> bool {
        self.par_run
    }

    #[inline]
    pub fn have_threads(&self) -> bool {
        self.have_threads
    }

    #[inline]
    pub fn world_comm(&self) -> usize {
        self.world_comm
    }

    /// Rank of the master process in any communicator.
    #[inline]
    pub const fn master_no() -> usize {
        0
    }

    pub fn n_procs(&self, comm: usize) -> Result<usize, PstreamError> {
        self.pool.size(comm)
    }

    /// This process' rank in `comm`, `None` if it is not a member.
    pub fn my_proc_no(&self, comm: usize) -> Result<Option<usize>, PstreamError> {
        self.pool.local_rank(comm)
    }

    pub fn master(&self, comm: usize) -> Result<bool, PstreamError> {
        Ok(self.my_proc_no(comm)? == Some(Self::master_no()))
    }

    /// Ranks `1..n` of `comm`.
    pub fn sub_procs(&self, comm: usize) -> Result<Range<usize>, PstreamError> {
        Ok(1..self.n_procs(comm)?)
    }

    /// Ranks `0..n` of `comm`.
    pub fn all_procs(&self, comm: usize) -> Result<Range<usize>, PstreamError> {
        Ok(0..self.n_procs(comm)?)
    }

    pub fn parent(&self, comm: usize) -> Result<Option<usize>, PstreamError> {
        self.pool.parent(comm)
    }

    /// Member ranks of `comm` in its parent's numbering.
    pub fn proc_ids(&self, comm: usize) -> Result<&[usize], PstreamError> {
        self.pool.members(comm)
    }

    /// Per-rank output decoration, empty in serial runs.
    #[inline]
    pub fn output_prefix(&self) -> &str {
        &self.prefix
    }

    #[inline]
    pub fn pool(&self) -> &CommunicatorPool {
        &self.pool
    }

    #[cfg(test)]
    pub(crate) fn pool_mut(&mut self) -> &mut CommunicatorPool {
        &mut self.pool
    }

    #[inline]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    #[inline]
    pub fn config(&self) -> &PstreamConfig {
        &self.config
    }

    /// Change the linear/tree switch-over size. Only schedules built
    /// afterwards are affected.
    pub fn set_n_procs_simple_sum(&mut self, n: usize) {
        self.config.n_procs_simple_sum = n;
    }

    pub fn set_comms_type(&mut self, comms_type: CommsType) {
        self.config.comms_type = comms_type;
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.config.debug = debug;
        self.pool.set_debug(debug);
    }

    // ----- schedules -----

    /// Schedule shape collectives on `comm` use: the star for `blocking`
    /// communication, otherwise chosen by `n_procs_simple_sum`.
    pub fn schedule_kind(&self, comm: usize) -> Result<ScheduleKind, PstreamError> {
        Ok(match self.config.comms_type {
            CommsType::Blocking => ScheduleKind::Linear,
            _ => CommsStruct::kind_for(self.n_procs(comm)?, self.config.n_procs_simple_sum),
        })
    }

    /// Plan of `rank` in `comm`, built on first use.
    pub fn get_or_build_schedule(
        &self,
        comm: usize,
        rank: usize,
    ) -> Result<&CommsStruct, PstreamError> {
        self.pool
            .get_or_build_kind(comm, rank, self.schedule_kind(comm)?)
    }

    // ----- rank translation -----

    pub fn base_proc_no(&self, comm: usize, local: usize) -> Result<usize, PstreamError> {
        self.pool.base_proc_no(comm, local)
    }

    pub fn proc_no(&self, comm: usize, absolute: usize) -> Result<Option<usize>, PstreamError> {
        self.pool.proc_no(comm, absolute)
    }

    pub fn proc_no_from(
        &self,
        target: usize,
        source: usize,
        source_local: usize,
    ) -> Result<Option<usize>, PstreamError> {
        self.pool.proc_no_from(target, source, source_local)
    }

    // ----- message tags -----

    #[inline]
    pub fn msg_type(&self) -> i32 {
        self.msg_type
    }

    pub fn set_msg_type(&mut self, tag: i32) {
        self.msg_type = tag;
    }

    /// Advance the message tag and return the new value.
    pub fn inc_msg_type(&mut self) -> i32 {
        self.msg_type += 1;
        self.msg_type
    }

    /// Warn when a collective runs on a communicator other than the
    /// configured `warn_comm`.
    pub(crate) fn check_warn_comm(&self, comm: usize, what: &str) {
        if let Some(w) = self.config.warn_comm {
            crate::cond_warn!(w != comm;
                "{}{what} on communicator {comm} while warn_comm is {w}", self.prefix);
        }
    }

    // ----- worlds -----

    pub fn world_count(&self) -> usize {
        self.world_names.len()
    }

    pub fn world_name(&self, id: usize) -> Result<&str, PstreamError> {
        self.world_names
            .get(id)
            .map(String::as_str)
            .ok_or(PstreamError::UnknownWorld(id))
    }

    pub fn world_names(&self) -> &[String] {
        &self.world_names
    }

    /// World id of every rank of the world communicator.
    pub fn world_ids(&self) -> &[usize] {
        &self.world_ids
    }

    pub fn my_world_id(&self) -> Result<usize, PstreamError> {
        let me = self
            .my_proc_no(self.world_comm)?
            .ok_or(PstreamError::NotAMember(self.world_comm))?;
        self.world_ids
            .get(me)
            .copied()
            .ok_or_else(|| PstreamError::InvalidWorlds(format!("no world id for rank {me}")))
    }

    pub fn my_world(&self) -> Result<&str, PstreamError> {
        self.world_name(self.my_world_id()?)
    }

    /// Split the ranks of the world communicator into named worlds for a
    /// coupled run. `ids[rank]` is the index into `names` of that rank's
    /// world.
    pub fn set_worlds(&mut self, names: Vec<String>, ids: Vec<usize>) -> Result<(), PstreamError> {
        let n = self.n_procs(self.world_comm)?;
        if names.is_empty() {
            return Err(PstreamError::InvalidWorlds("no world names".into()));
        }
        if ids.len() != n {
            return Err(PstreamError::InvalidWorlds(format!(
                "{} world ids for {n} ranks",
                ids.len()
            )));
        }
        if let Some(&bad) = ids.iter().find(|&&id| id >= names.len()) {
            return Err(PstreamError::UnknownWorld(bad));
        }
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(PstreamError::InvalidWorlds(format!(
                    "world name {name:?} appears twice"
                )));
            }
        }
        self.world_names = names;
        self.world_ids = ids;
        Ok(())
    }
}

/// Communicator freed when dropped. Dereferences to the owning state so it
/// can be used wherever the state is.
pub struct ScopedCommunicator<'a, T: Transport> {
    state: &'a mut ParallelState<T>,
    index: usize,
    detach: bool,
}

impl<T: Transport> ScopedCommunicator<'_, T> {
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<T: Transport> Deref for ScopedCommunicator<'_, T> {
    type Target = ParallelState<T>;

    fn deref(&self) -> &Self::Target {
        self.state
    }
}

impl<T: Transport> DerefMut for ScopedCommunicator<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.state
    }
}

impl<T: Transport> Drop for ScopedCommunicator<'_, T> {
    fn drop(&mut self) {
        if let Err(e) = self.state.free_communicator(self.index, self.detach) {
            log::error!(
                "{}failed to free scoped communicator {}: {e}",
                self.state.prefix,
                self.index
            );
        }
    }
}
