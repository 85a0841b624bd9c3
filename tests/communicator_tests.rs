use proptest::prelude::*;
use pstream::prelude::*;

#[test]
fn freed_indices_come_back_last_in_first_out() {
    let mut pool = CommunicatorPool::new();
    let a = pool.allocate(None, vec![0, 1]).unwrap();
    let b = pool.allocate(None, vec![0, 1, 2]).unwrap();
    pool.free(a).unwrap();
    pool.free(b).unwrap();
    assert_eq!(pool.allocate(None, vec![0]).unwrap(), b);
    assert_eq!(pool.allocate(None, vec![0]).unwrap(), a);
    assert_eq!(pool.capacity(), 2);
}

#[test]
fn double_free_is_rejected_and_fatal() {
    let mut pool = CommunicatorPool::new();
    let c = pool.allocate(None, vec![0, 1]).unwrap();
    pool.free(c).unwrap();
    let err = pool.free(c).unwrap_err();
    assert_eq!(err, PstreamError::DoubleFree(c));
    assert!(err.is_fatal());
    // The slot is on the free list exactly once.
    assert_eq!(pool.free_list(), &[c]);
}

#[test]
fn freeing_an_unknown_index_fails() {
    let mut pool = CommunicatorPool::new();
    assert_eq!(pool.free(7), Err(PstreamError::InvalidCommunicator(7)));
}

#[test]
fn empty_member_list_is_rejected() {
    let mut pool = CommunicatorPool::new();
    let err = pool.allocate(None, Vec::new()).unwrap_err();
    assert!(matches!(err, PstreamError::EmptyMembers { parent: None }));
    assert!(err.is_fatal());
    assert_eq!(pool.capacity(), 0);
}

#[test]
fn parent_must_be_live() {
    let mut pool = CommunicatorPool::new();
    let world = pool.allocate(None, (0..4).collect()).unwrap();
    pool.free(world).unwrap();
    assert_eq!(
        pool.allocate(Some(world), vec![1, 2]),
        Err(PstreamError::InvalidCommunicator(world))
    );
}

#[test]
fn pool_invariants_hold_through_churn() {
    let mut pool = CommunicatorPool::new();
    let world = pool.allocate(None, (0..6).collect()).unwrap();
    let subs: Vec<usize> = (0..4)
        .map(|k| pool.allocate(Some(world), vec![k, k + 1]).unwrap())
        .collect();
    pool.free(subs[1]).unwrap();
    pool.free(subs[3]).unwrap();
    pool.validate_invariants().unwrap();
    pool.allocate(Some(world), vec![0, 5]).unwrap();
    pool.validate_invariants().unwrap();
    assert_eq!(pool.live_indices().count(), 4);
}

fn permutation_of(n: usize) -> impl Strategy<Value = Vec<usize>> {
    Just((0..n).map(|r| r * 2 + 1).collect::<Vec<_>>()).prop_shuffle()
}

proptest! {
    #[test]
    fn only_sorted_member_lists_are_accepted(
        members in (1usize..12).prop_flat_map(permutation_of)
    ) {
        let mut pool = CommunicatorPool::new();
        let sorted = members.windows(2).all(|w| w[0] < w[1]);
        match pool.allocate(None, members.clone()) {
            Ok(c) => {
                prop_assert!(sorted);
                prop_assert_eq!(pool.members(c).unwrap(), &members[..]);
            }
            Err(e) => {
                prop_assert!(!sorted);
                prop_assert!(
                    matches!(e, PstreamError::UnsortedMembers { .. }),
                    "unexpected error: {e}"
                );
                prop_assert_eq!(pool.capacity(), 0);
            }
        }
    }

    #[test]
    fn repeated_members_are_rejected(r in 0usize..32, n in 2usize..6) {
        let mut pool = CommunicatorPool::new();
        let members = vec![r; n];
        prop_assert!(pool.allocate(None, members).is_err());
    }
}
