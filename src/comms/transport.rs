//! Boundary to the native message-passing layer.
//!
//! The communicator pool only needs two hooks from a transport: *attach*
//! (create the native group for a freshly allocated communicator and report
//! this process' rank in it) and *detach* (release it). Collectives
//! additionally need blocking point-to-point `send`/`recv` addressed by
//! communicator index and rank within that communicator.
//!
//! Three backends are provided:
//! - [`NullTransport`]: serial runs, never moves bytes.
//! - [`ThreadTransport`]: several "processes" as threads of one program,
//!   sharing a [`Mailbox`]. Used to exercise collectives without MPI.
//! - `MpiTransport` (feature `mpi-support`): rsmpi sub-communicators.

use crate::pstream_error::PstreamError;
use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Arguments of [`Transport::attach`].
#[derive(Copy, Clone, Debug)]
pub struct AttachRequest<'a> {
    /// Index the pool assigned to the new communicator.
    pub index: usize,
    pub parent: Option<usize>,
    /// Member ranks in the parent's numbering (absolute without a parent).
    pub members: &'a [usize],
    /// This process' rank in `parent`; `None` for top-level communicators,
    /// where the transport knows the absolute rank itself.
    pub parent_rank: Option<usize>,
}

/// Native transport hooks used by the communicator layer.
pub trait Transport {
    /// Register communicator `req.index`; returns this process' rank in it,
    /// or `None` if the process is not a member. May block on a collective
    /// handshake with the other members of the parent.
    fn attach(&mut self, req: AttachRequest<'_>) -> Result<Option<usize>, PstreamError>;

    /// Release the native resources of communicator `index`.
    fn detach(&mut self, index: usize) -> Result<(), PstreamError>;

    /// Send `payload` to rank `to` of communicator `comm`.
    fn send(&self, comm: usize, to: usize, tag: i32, payload: &[u8]) -> Result<(), PstreamError>;

    /// Block until a message from rank `from` of `comm` with `tag` arrives.
    fn recv(&self, comm: usize, from: usize, tag: i32) -> Result<Bytes, PstreamError>;
}

/// Transport of a serial run.
#[derive(Clone, Debug, Default)]
pub struct NullTransport;

impl Transport for NullTransport {
    fn attach(&mut self, req: AttachRequest<'_>) -> Result<Option<usize>, PstreamError> {
        let me = req.parent_rank.unwrap_or(0);
        Ok(req.members.iter().position(|&m| m == me))
    }

    fn detach(&mut self, _index: usize) -> Result<(), PstreamError> {
        Ok(())
    }

    fn send(&self, comm: usize, to: usize, _tag: i32, _payload: &[u8]) -> Result<(), PstreamError> {
        Err(PstreamError::Transport(format!(
            "serial transport cannot send to rank {to} of communicator {comm}"
        )))
    }

    fn recv(&self, comm: usize, from: usize, _tag: i32) -> Result<Bytes, PstreamError> {
        Err(PstreamError::Transport(format!(
            "serial transport cannot receive from rank {from} of communicator {comm}"
        )))
    }
}

// --- ThreadTransport: in-process ranks ---

type Key = (usize, usize, usize, i32); // (comm, src, dst, tag), absolute ranks

/// Shared message queues of a [`ThreadTransport`] world. FIFO per key.
#[derive(Debug, Default)]
pub struct Mailbox {
    queues: Mutex<HashMap<Key, VecDeque<Bytes>>>,
    arrived: Condvar,
}

impl Mailbox {
    fn post(&self, key: Key, msg: Bytes) {
        self.queues.lock().entry(key).or_default().push_back(msg);
        self.arrived.notify_all();
    }

    fn take(&self, key: Key, deadline: Instant) -> Option<Bytes> {
        let mut queues = self.queues.lock();
        loop {
            if let Some(msg) = queues.get_mut(&key).and_then(VecDeque::pop_front) {
                return Some(msg);
            }
            if self.arrived.wait_until(&mut queues, deadline).timed_out() {
                return queues.get_mut(&key).and_then(VecDeque::pop_front);
            }
        }
    }

    /// Messages posted but not yet received.
    pub fn pending(&self) -> usize {
        self.queues.lock().values().map(VecDeque::len).sum()
    }
}

/// One rank of an in-process world; every rank runs on its own thread with
/// its own communicator table.
#[derive(Clone, Debug)]
pub struct ThreadTransport {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
    /// Absolute member ranks of every attached communicator.
    groups: HashMap<usize, Vec<usize>>,
    timeout: Duration,
}

impl ThreadTransport {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Transports for ranks `0..size` sharing one mailbox.
    pub fn world(size: usize) -> Vec<ThreadTransport> {
        let mailbox = Arc::new(Mailbox::default());
        (0..size)
            .map(|rank| ThreadTransport {
                rank,
                size,
                mailbox: Arc::clone(&mailbox),
                groups: HashMap::new(),
                timeout: Self::DEFAULT_TIMEOUT,
            })
            .collect()
    }

    /// Fail receives that wait longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Absolute rank of this thread.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Number of ranks in the world.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn mailbox(&self) -> &Arc<Mailbox> {
        &self.mailbox
    }

    /// Number of communicators currently attached.
    pub fn attached(&self) -> usize {
        self.groups.len()
    }

    fn absolute(&self, comm: usize, rank: usize) -> Result<usize, PstreamError> {
        let group = self.groups.get(&comm).ok_or_else(|| {
            PstreamError::Transport(format!("communicator {comm} is not attached"))
        })?;
        group.get(rank).copied().ok_or(PstreamError::InvalidRank {
            comm,
            rank,
            size: group.len(),
        })
    }
}

impl Transport for ThreadTransport {
    fn attach(&mut self, req: AttachRequest<'_>) -> Result<Option<usize>, PstreamError> {
        let absolute: Vec<usize> = match req.parent {
            None => req.members.to_vec(),
            Some(p) => req
                .members
                .iter()
                .map(|&m| self.absolute(p, m))
                .collect::<Result<_, _>>()?,
        };
        if let Some(&bad) = absolute.iter().find(|&&a| a >= self.size) {
            return Err(PstreamError::Transport(format!(
                "rank {bad} outside a world of {} threads",
                self.size
            )));
        }
        let me = absolute.iter().position(|&a| a == self.rank);
        self.groups.insert(req.index, absolute);
        Ok(me)
    }

    fn detach(&mut self, index: usize) -> Result<(), PstreamError> {
        self.groups
            .remove(&index)
            .map(|_| ())
            .ok_or_else(|| PstreamError::Transport(format!("communicator {index} is not attached")))
    }

    fn send(&self, comm: usize, to: usize, tag: i32, payload: &[u8]) -> Result<(), PstreamError> {
        let dst = self.absolute(comm, to)?;
        self.mailbox
            .post((comm, self.rank, dst, tag), Bytes::copy_from_slice(payload));
        Ok(())
    }

    fn recv(&self, comm: usize, from: usize, tag: i32) -> Result<Bytes, PstreamError> {
        let src = self.absolute(comm, from)?;
        let deadline = Instant::now() + self.timeout;
        self.mailbox
            .take((comm, src, self.rank, tag), deadline)
            .ok_or_else(|| {
                PstreamError::Transport(format!(
                    "rank {} timed out waiting for rank {from} of communicator {comm} (tag {tag})",
                    self.rank
                ))
            })
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use mpi::environment::Universe;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    /// rsmpi-backed transport. Each attached communicator is a
    /// sub-communicator split from its parent's native communicator.
    pub struct MpiTransport {
        _universe: Option<Universe>,
        world: SimpleCommunicator,
        comms: HashMap<usize, SimpleCommunicator>,
    }

    impl MpiTransport {
        /// Initialise MPI, or reuse it if the host already did.
        pub fn init() -> Self {
            let (world, universe) = match mpi::initialize() {
                Some(universe) => (universe.world(), Some(universe)),
                None => (SimpleCommunicator::world(), None),
            };
            Self {
                _universe: universe,
                world,
                comms: HashMap::new(),
            }
        }

        /// Number of processes; the argument for `set_par_run`.
        pub fn world_size(&self) -> usize {
            self.world.size() as usize
        }

        pub fn world_rank(&self) -> usize {
            self.world.rank() as usize
        }

        fn comm(&self, index: usize) -> Result<&SimpleCommunicator, PstreamError> {
            self.comms.get(&index).ok_or_else(|| {
                PstreamError::Transport(format!("communicator {index} is not attached"))
            })
        }
    }

    impl Transport for MpiTransport {
        fn attach(&mut self, req: AttachRequest<'_>) -> Result<Option<usize>, PstreamError> {
            let ranks: Vec<mpi::Rank> = req.members.iter().map(|&m| m as mpi::Rank).collect();
            let parent = match req.parent {
                None => &self.world,
                // Not a member of the parent, so not of the child either; the
                // split is collective over the parent's members only.
                Some(p) => match self.comms.get(&p) {
                    Some(c) => c,
                    None => return Ok(None),
                },
            };
            let group = parent.group().include(&ranks);
            let sub = parent.split_by_subgroup_collective(&group);
            let me = sub.as_ref().map(|c| c.rank() as usize);
            if let Some(c) = sub {
                self.comms.insert(req.index, c);
            }
            Ok(me)
        }

        fn detach(&mut self, index: usize) -> Result<(), PstreamError> {
            // Dropping the sub-communicator frees it; non-members never had one.
            self.comms.remove(&index);
            Ok(())
        }

        fn send(
            &self,
            comm: usize,
            to: usize,
            tag: i32,
            payload: &[u8],
        ) -> Result<(), PstreamError> {
            self.comm(comm)?
                .process_at_rank(to as mpi::Rank)
                .send_with_tag(payload, tag);
            Ok(())
        }

        fn recv(&self, comm: usize, from: usize, tag: i32) -> Result<Bytes, PstreamError> {
            let (msg, _status) = self
                .comm(comm)?
                .process_at_rank(from as mpi::Rank)
                .receive_vec_with_tag::<u8>(tag);
            Ok(Bytes::from(msg))
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiTransport;
