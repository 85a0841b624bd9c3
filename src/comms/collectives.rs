//! Collective operations driven by the per-rank schedules.
//!
//! Every function here must be called by all members of the communicator,
//! in the same order. In a serial run, or on a one-rank communicator, they
//! return their input untouched without touching the transport.
//!
//! Combine operators are supplied by the caller and must be associative; the
//! order of combination follows the schedule (`op(mine, from_below)`).

use crate::comms::schedule::CommsStruct;
use crate::comms::transport::Transport;
use crate::comms::wire;
use crate::parallel_state::ParallelState;
use crate::pstream_error::PstreamError;
use bytemuck::Pod;

/// This rank and its plan, or `None` when the collective is a no-op.
fn plan_of<'s, T: Transport>(
    state: &'s ParallelState<T>,
    comm: usize,
    what: &str,
) -> Result<Option<(usize, &'s CommsStruct)>, PstreamError> {
    if !state.is_parallel_run() || state.n_procs(comm)? <= 1 {
        return Ok(None);
    }
    state.check_warn_comm(comm, what);
    let me = state
        .my_proc_no(comm)?
        .ok_or(PstreamError::NotAMember(comm))?;
    Ok(Some((me, state.get_or_build_schedule(comm, me)?)))
}

/// Combine `value` over all ranks towards the master. The master returns
/// the full combination, other ranks the combination of their subtree.
pub fn gather<T, P, F>(
    state: &ParallelState<T>,
    comm: usize,
    value: P,
    op: F,
) -> Result<P, PstreamError>
where
    T: Transport,
    P: Pod,
    F: Fn(P, P) -> P,
{
    let Some((_, plan)) = plan_of(state, comm, "gather")? else {
        return Ok(value);
    };
    let tag = state.msg_type();
    let mut acc = value;
    for &below in plan.below() {
        let bytes = state.transport().recv(comm, below, tag)?;
        acc = op(acc, wire::decode_one(below, &bytes)?);
    }
    if let Some(above) = plan.above() {
        state
            .transport()
            .send(comm, above, tag, wire::bytes_of(&acc))?;
    }
    Ok(acc)
}

/// Distribute the master's `value` to every rank.
pub fn scatter<T, P>(state: &ParallelState<T>, comm: usize, value: P) -> Result<P, PstreamError>
where
    T: Transport,
    P: Pod,
{
    let Some((_, plan)) = plan_of(state, comm, "scatter")? else {
        return Ok(value);
    };
    let tag = state.msg_type();
    let mut value = value;
    if let Some(above) = plan.above() {
        let bytes = state.transport().recv(comm, above, tag)?;
        value = wire::decode_one(above, &bytes)?;
    }
    // Highest first so the deepest subtrees start earliest.
    for &below in plan.below().iter().rev() {
        state
            .transport()
            .send(comm, below, tag, wire::bytes_of(&value))?;
    }
    Ok(value)
}

/// Alias of [`scatter`]: the master's value wins.
pub fn broadcast<T, P>(state: &ParallelState<T>, comm: usize, value: P) -> Result<P, PstreamError>
where
    T: Transport,
    P: Pod,
{
    scatter(state, comm, value)
}

/// Combine `value` over all ranks; every rank returns the same result.
pub fn reduce<T, P, F>(
    state: &ParallelState<T>,
    comm: usize,
    value: P,
    op: F,
) -> Result<P, PstreamError>
where
    T: Transport,
    P: Pod,
    F: Fn(P, P) -> P,
{
    let combined = gather(state, comm, value, op)?;
    scatter(state, comm, combined)
}

fn check_list_len<T: Transport>(
    state: &ParallelState<T>,
    comm: usize,
    len: usize,
) -> Result<(), PstreamError> {
    let size = state.n_procs(comm)?;
    if len != size {
        return Err(PstreamError::ListSizeMismatch { comm, len, size });
    }
    Ok(())
}

/// Collect one value per rank on the master: `values[r]` is rank `r`'s
/// entry. Each rank must have filled its own slot; on return every rank
/// also holds the slots of its subtree.
pub fn gather_list<T, P>(
    state: &ParallelState<T>,
    comm: usize,
    values: &mut [P],
) -> Result<(), PstreamError>
where
    T: Transport,
    P: Pod,
{
    if state.is_parallel_run() {
        check_list_len(state, comm, values.len())?;
    }
    let Some((me, plan)) = plan_of(state, comm, "gather_list")? else {
        return Ok(());
    };
    let tag = state.msg_type();

    for &below in plan.below() {
        let leaves = state.get_or_build_schedule(comm, below)?.all_below();
        let bytes = state.transport().recv(comm, below, tag)?;
        let received: Vec<P> = wire::decode_vec(below, &bytes, leaves.len() + 1)?;
        values[below] = received[0];
        for (&leaf, &v) in leaves.iter().zip(&received[1..]) {
            values[leaf] = v;
        }
    }

    if let Some(above) = plan.above() {
        // Own value first, then the subtree in schedule order.
        let mut sending = Vec::with_capacity(plan.all_below().len() + 1);
        sending.push(values[me]);
        sending.extend(plan.all_below().iter().map(|&leaf| values[leaf]));
        state
            .transport()
            .send(comm, above, tag, wire::cast_slice(&sending))?;
    }
    Ok(())
}

/// Inverse of [`gather_list`]: push the master's list down so every rank
/// ends up with all slots. Each rank must already hold the slots of its own
/// subtree (true after a [`gather_list`]); it receives everything else from
/// above.
pub fn scatter_list<T, P>(
    state: &ParallelState<T>,
    comm: usize,
    values: &mut [P],
) -> Result<(), PstreamError>
where
    T: Transport,
    P: Pod,
{
    if state.is_parallel_run() {
        check_list_len(state, comm, values.len())?;
    }
    let Some((_, plan)) = plan_of(state, comm, "scatter_list")? else {
        return Ok(());
    };
    let tag = state.msg_type();

    if let Some(above) = plan.above() {
        let not_below = plan.all_not_below();
        let bytes = state.transport().recv(comm, above, tag)?;
        let received: Vec<P> = wire::decode_vec(above, &bytes, not_below.len())?;
        for (&leaf, v) in not_below.iter().zip(received) {
            values[leaf] = v;
        }
    }

    for &below in plan.below().iter().rev() {
        let not_below = state.get_or_build_schedule(comm, below)?.all_not_below();
        let sending: Vec<P> = not_below.iter().map(|&leaf| values[leaf]).collect();
        state
            .transport()
            .send(comm, below, tag, wire::cast_slice(&sending))?;
    }
    Ok(())
}

/// Every rank ends with every rank's slot.
pub fn all_gather_list<T, P>(
    state: &ParallelState<T>,
    comm: usize,
    values: &mut [P],
) -> Result<(), PstreamError>
where
    T: Transport,
    P: Pod,
{
    gather_list(state, comm, values)?;
    scatter_list(state, comm, values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_collectives_are_identity() {
        let state = ParallelState::serial().unwrap();
        assert_eq!(gather(&state, 0, 3u32, |a, b| a + b).unwrap(), 3);
        assert_eq!(reduce(&state, 0, 7i64, i64::max).unwrap(), 7);
        assert_eq!(scatter(&state, 0, 1.5f64).unwrap(), 1.5);
        let mut vals = [9u16];
        all_gather_list(&state, 0, &mut vals).unwrap();
        assert_eq!(vals, [9]);
    }

    #[test]
    fn non_member_is_rejected() {
        let mut state = ParallelState::serial().unwrap();
        state.set_par_run(2, false).unwrap();
        state.pool_mut().set_local_rank(0, None).unwrap();
        assert_eq!(
            reduce(&state, 0, 1u8, |a, b| a | b),
            Err(PstreamError::NotAMember(0))
        );
    }

    #[test]
    fn list_length_must_match() {
        let mut state = ParallelState::serial().unwrap();
        state.set_par_run(3, false).unwrap();
        let mut vals = [0u32; 2];
        assert_eq!(
            gather_list(&state, 0, &mut vals),
            Err(PstreamError::ListSizeMismatch {
                comm: 0,
                len: 2,
                size: 3
            })
        );
    }
}
