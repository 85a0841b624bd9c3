use pstream::prelude::*;

#[test]
fn serial_to_parallel_transition() {
    let mut state = ParallelState::serial().unwrap();
    state.set_par_run(0, false).unwrap();
    assert!(!state.is_parallel_run());
    let world = state.world_comm();
    assert_eq!(state.proc_ids(world).unwrap(), &[0]);
    assert_eq!(state.n_procs(world).unwrap(), 1);

    state.set_par_run(4, false).unwrap();
    assert!(state.is_parallel_run());
    assert_eq!(state.proc_ids(world).unwrap(), &[0, 1, 2, 3]);
    // The serial world's slot was freed and handed straight back.
    assert_eq!(state.world_comm(), world);
    assert_eq!(state.pool().capacity(), 1);
    assert!(state.pool().free_list().is_empty());
}

#[test]
fn double_free_of_a_communicator() {
    let mut state = ParallelState::serial().unwrap();
    state.set_par_run(4, false).unwrap();
    let c = state.allocate_communicator(Some(0), vec![0, 2], true).unwrap();
    state.free_communicator(c, true).unwrap();
    let err = state.free_communicator(c, true).unwrap_err();
    assert_eq!(err, PstreamError::DoubleFree(c));
    assert!(err.is_fatal());
}

#[test]
fn attach_assigns_this_process_rank() {
    let mut state = ParallelState::serial().unwrap();
    state.set_par_run(6, false).unwrap();
    // The serial transport runs as absolute rank 0.
    let with_master = state.allocate_communicator(Some(0), vec![0, 3], true).unwrap();
    let without = state.allocate_communicator(Some(0), vec![2, 5], true).unwrap();
    let unattached = state.allocate_communicator(Some(0), vec![2, 5], false).unwrap();
    assert_eq!(state.my_proc_no(with_master).unwrap(), Some(0));
    assert!(state.master(with_master).unwrap());
    assert_eq!(state.my_proc_no(without).unwrap(), None);
    assert!(!state.master(without).unwrap());
    assert_eq!(state.my_proc_no(unattached).unwrap(), Some(0));
}

#[test]
fn free_communicators_keeps_world_index_reusable() {
    let mut state = ParallelState::serial().unwrap();
    state.set_par_run(4, false).unwrap();
    for k in 0..3 {
        state.allocate_communicator(Some(0), vec![k, k + 1], true).unwrap();
    }
    state.shutdown().unwrap();
    assert_eq!(state.pool().live_indices().count(), 0);
    assert_eq!(state.pool().free_list().last(), Some(&0));
    state.set_par_run(2, false).unwrap();
    assert_eq!(state.world_comm(), 0);
}

#[test]
fn scoped_communicator_is_freed_on_drop() {
    let mut state = ParallelState::serial().unwrap();
    state.set_par_run(4, false).unwrap();
    let index = {
        let scoped = state.scoped(Some(0), vec![1, 2], true).unwrap();
        assert_eq!(scoped.n_procs(scoped.index()).unwrap(), 2);
        assert_eq!(scoped.base_proc_no(scoped.index(), 1).unwrap(), 2);
        scoped.index()
    };
    assert!(!state.pool().is_live(index));
    assert_eq!(state.pool().free_list(), &[index]);
}

#[test]
fn worlds_for_coupled_runs() {
    let mut state = ParallelState::serial().unwrap();
    state.set_par_run(4, false).unwrap();
    assert_eq!(state.world_count(), 1);

    state
        .set_worlds(vec!["fluid".into(), "solid".into()], vec![0, 0, 1, 1])
        .unwrap();
    assert_eq!(state.world_count(), 2);
    assert_eq!(state.world_ids(), &[0, 0, 1, 1]);
    assert_eq!(state.my_world_id().unwrap(), 0);
    assert_eq!(state.my_world().unwrap(), "fluid");
    assert_eq!(state.world_name(1).unwrap(), "solid");
    assert_eq!(state.world_name(2), Err(PstreamError::UnknownWorld(2)));

    // set_par_run resets to one unnamed world.
    state.set_par_run(4, false).unwrap();
    assert_eq!(state.world_names(), &[String::new()]);
}

#[test]
fn invalid_worlds_are_rejected() {
    let mut state = ParallelState::serial().unwrap();
    state.set_par_run(3, false).unwrap();
    let names = || vec!["a".to_string(), "b".to_string()];

    assert!(matches!(
        state.set_worlds(Vec::new(), vec![0, 0, 0]),
        Err(PstreamError::InvalidWorlds(_))
    ));
    assert!(matches!(
        state.set_worlds(names(), vec![0, 1]),
        Err(PstreamError::InvalidWorlds(_))
    ));
    assert_eq!(
        state.set_worlds(names(), vec![0, 2, 1]),
        Err(PstreamError::UnknownWorld(2))
    );
    assert!(matches!(
        state.set_worlds(vec!["a".into(), "a".into()], vec![0, 1, 1]),
        Err(PstreamError::InvalidWorlds(_))
    ));
    // Nothing changed.
    assert_eq!(state.world_count(), 1);
}

#[test]
fn config_from_lookup_drives_the_state() {
    let cfg = PstreamConfig::from_lookup(|key| match key {
        "PSTREAM_NPROCS_SIMPLE_SUM" => Some("4".into()),
        "PSTREAM_COMMS_TYPE" => Some("scheduled".into()),
        _ => None,
    })
    .unwrap();
    let mut state = ParallelState::new(NullTransport, cfg).unwrap();
    state.set_par_run(6, false).unwrap();
    assert_eq!(state.config().comms_type, CommsType::Scheduled);
    assert_eq!(state.schedule_kind(0).unwrap(), ScheduleKind::Tree);
    state.set_n_procs_simple_sum(16);
    assert_eq!(state.schedule_kind(0).unwrap(), ScheduleKind::Linear);
}
