//! # pstream
//!
//! pstream is the communicator layer of an SPMD parallel runtime. Every
//! process runs the same program and keeps its own table of communicators;
//! collective operations are routed along per-rank schedules computed from
//! that table.
//!
//! ## Features
//! - A communicator pool with last-in first-out index reuse, so index
//!   assignment is identical on every process that allocates and frees in
//!   the same order
//! - Rank translation between nested communicators (`base_proc_no`,
//!   `proc_no`)
//! - Linear (star) and binary-tree schedules, selected by the
//!   `n_procs_simple_sum` threshold and built lazily per rank
//! - Serial/parallel switch-over of the world communicator and named worlds
//!   for coupled runs
//! - Pluggable transports (serial, in-process threads, MPI) and
//!   schedule-driven gather/scatter/reduce
//!
//! ## Usage
//!
//! ```rust
//! use pstream::prelude::*;
//!
//! let mut state = ParallelState::serial().unwrap();
//! state.set_par_run(8, false).unwrap();
//! let odd = state.allocate_communicator(Some(0), vec![1, 3, 5, 7], false).unwrap();
//! assert_eq!(state.base_proc_no(odd, 2).unwrap(), 5);
//! assert_eq!(state.proc_no(odd, 7).unwrap(), Some(3));
//! ```
//!
//! ## Threading
//! A [`ParallelState`](parallel_state::ParallelState) is driven by one
//! thread per process and is not `Sync`. Use
//! [`ThreadTransport`](comms::transport::ThreadTransport) to run several
//! ranks as threads of one program, each with its own state.

pub mod comms;
pub mod config;
pub mod debug_invariants;
pub mod diagnostics;
pub mod parallel_state;
pub mod pstream_error;

pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::comms::collectives::{
        all_gather_list, broadcast, gather, gather_list, reduce, scatter, scatter_list,
    };
    pub use crate::comms::pool::CommunicatorPool;
    pub use crate::comms::schedule::{CommsStruct, ScheduleKind};
    #[cfg(feature = "mpi-support")]
    pub use crate::comms::transport::MpiTransport;
    pub use crate::comms::transport::{NullTransport, ThreadTransport, Transport};
    pub use crate::config::{CommsType, PstreamConfig};
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::parallel_state::{ParallelState, ScopedCommunicator};
    pub use crate::pstream_error::PstreamError;
}
