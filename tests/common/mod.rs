#![allow(dead_code)]

use std::hint;
use std::time::{Duration, Instant};

use uthreads::{ThreadState, Tid, MAIN_TID};

pub const QUANTUM_USECS: u64 = 2_000;

const DEADLINE: Duration = Duration::from_secs(30);

/// Trabajo de CPU en modo usuario: el temporizador es virtual y solo avanza
/// mientras el proceso corre en modo usuario.
pub fn spin(iterations: u32) {
    for _ in 0..iterations {
        hint::spin_loop();
    }
}

/// Espera activa desde main hasta que `done` sea cierto.
pub fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + DEADLINE;
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        spin(10_000);
    }
}

pub fn burn_quanta(quanta: u64) {
    let target = uthreads::total_quanta() + quanta;
    wait_until("quanta to elapse", || uthreads::total_quanta() >= target);
}

pub fn wait_for_state(tid: Tid, state: ThreadState) {
    wait_until("thread state", || {
        uthreads::thread_state(tid).ok() == Some(state)
    });
}

pub fn wait_until_gone(tid: Tid) {
    wait_until("thread to be released", || {
        uthreads::thread_state(tid).is_err()
    });
}

/// Termina main: libera todo y sale del proceso con código 0.
pub fn finish() -> ! {
    let result = uthreads::terminate(MAIN_TID);
    panic!("main kept running after terminating itself: {result:?}")
}
