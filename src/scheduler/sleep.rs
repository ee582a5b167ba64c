use crate::uthreads::{ThreadState, ThreadTable};

use super::rr::ReadyQueue;

/// Barrido de hilos dormidos antes de cada decisión de planificación.
///
/// Un hilo cuyo `wake_at` coincide con `now`:
/// - `Sleeping` → `Ready`, y se encola al final.
/// - `SleepingAndBlocked` → `Blocked` (el bloqueo explícito sigue vigente).
///
/// La comparación es por igualdad exacta: si algún día se saltara el cuanto
/// `wake_at`, ese hilo no despertaría nunca.
pub(super) fn sweep_sleepers(threads: &mut ThreadTable, ready: &mut ReadyQueue, now: u64) {
    for tcb in threads.iter_mut() {
        if tcb.wake_at != Some(now) {
            continue;
        }
        tcb.wake_at = None;
        match tcb.state {
            ThreadState::Sleeping => {
                tcb.state = ThreadState::Ready;
                ready.push(tcb.id);
            }
            ThreadState::SleepingAndBlocked => tcb.state = ThreadState::Blocked,
            _ => {}
        }
    }
}
