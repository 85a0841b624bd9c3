//! Allocate/free/schedule chatter only reaches the logger when the debug
//! switch is on. One test per binary: the logger is process-global.

use log::{LevelFilter, Log, Metadata, Record};
use parking_lot::{Mutex, const_mutex};
use pstream::prelude::*;

struct Capture {
    lines: Mutex<Vec<String>>,
}

impl Log for Capture {
    fn enabled(&self, _: &Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        self.lines
            .lock()
            .push(format!("{} {}", record.level(), record.args()));
    }

    fn flush(&self) {}
}

static CAPTURE: Capture = Capture {
    lines: const_mutex(Vec::new()),
};

fn take_lines() -> Vec<String> {
    std::mem::take(&mut *CAPTURE.lines.lock())
}

#[test]
fn debug_switch_gates_communicator_logging() {
    log::set_logger(&CAPTURE).unwrap();
    log::set_max_level(LevelFilter::Debug);

    let mut quiet = CommunicatorPool::new();
    let c = quiet.allocate(None, (0..4).collect()).unwrap();
    quiet.get_or_build_schedule(c, 1, 16).unwrap();
    quiet.free(c).unwrap();
    assert!(take_lines().is_empty());

    let mut loud = CommunicatorPool::with_debug(true);
    let c = loud.allocate(None, (0..4).collect()).unwrap();
    loud.get_or_build_schedule(c, 1, 16).unwrap();
    loud.free(c).unwrap();
    let lines = take_lines();
    assert_eq!(lines.len(), 3, "{lines:#?}");
    assert!(lines[0].starts_with("DEBUG") && lines[0].contains("Allocating communicator 0"));
    assert!(lines[1].contains("Linear schedule for rank 1 of communicator 0"));
    assert!(lines[2].contains("Freeing communicator 0"));

    // Switching debug on through the state reaches its pool as well.
    let mut state = ParallelState::serial().unwrap();
    assert!(take_lines().is_empty());
    state.set_debug(true);
    state.set_par_run(2, false).unwrap();
    let lines = take_lines();
    assert!(lines.iter().any(|l| l.contains("Freeing communicator 0")), "{lines:#?}");
    assert!(lines.iter().any(|l| l.contains("set_par_run: parallel=true")), "{lines:#?}");
}
