//! Communicators: the table, rank translation, schedules, transport and
//! the collectives built on them.

pub mod collectives;
pub mod pool;
pub mod schedule;
pub mod topology;
pub mod transport;
pub mod wire;

pub use pool::{CommunicatorPool, CommunicatorRecord};
pub use schedule::{CommsStruct, ScheduleKind};
pub use transport::{AttachRequest, Mailbox, NullTransport, ThreadTransport, Transport};
#[cfg(feature = "mpi-support")]
pub use transport::MpiTransport;
