#![allow(dead_code)]
use pstream::prelude::*;
use std::thread;
use std::time::Duration;

/// Run `body` on `n` in-process ranks, each with its own state already
/// switched to a parallel run of `n`. Results come back in rank order.
pub fn spmd<R, F>(n: usize, config: &PstreamConfig, body: F) -> Vec<R>
where
    R: Send,
    F: Fn(&mut ParallelState<ThreadTransport>) -> R + Sync,
{
    let transports = ThreadTransport::world(n);
    thread::scope(|s| {
        let handles: Vec<_> = transports
            .into_iter()
            .map(|t| {
                let cfg = config.clone();
                let body = &body;
                s.spawn(move || {
                    let t = t.with_timeout(Duration::from_secs(10));
                    let mut state = ParallelState::new(t, cfg).expect("state");
                    state.set_par_run(n, true).expect("set_par_run");
                    body(&mut state)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rank panicked"))
            .collect()
    })
}

/// Config with the linear/tree switch at `threshold`.
pub fn config_with_threshold(threshold: usize) -> PstreamConfig {
    PstreamConfig {
        n_procs_simple_sum: threshold,
        ..PstreamConfig::default()
    }
}
