//! Estado global de la biblioteca y los caminos que no vuelven al usuario:
//! el manejador del temporizador, el arranque de un hilo y el apagado.

use std::process;
use std::sync::{Mutex, PoisonError};

use once_cell::sync::Lazy;

use crate::preemption::{CriticalSection, VirtualTimer};
use crate::scheduler::Scheduler;

use super::api;
use super::error::{Result, ThreadError};
use super::thread::MAIN_TID;

/// Planificador vivo más el temporizador que lo alimenta.
#[derive(Debug)]
pub(crate) struct Runtime {
    pub(crate) scheduler: Scheduler,
    pub(crate) timer: VirtualTimer,
}

/// Se toma solo con `SIGVTALRM` enmascarada: nunca hay contención y el
/// manejador no puede encontrarlo tomado.
static RUNTIME: Lazy<Mutex<Option<Runtime>>> = Lazy::new(|| Mutex::new(None));

/// Ejecuta `f` sobre el runtime. Hay que estar dentro de una sección crítica
/// (o del manejador) y no cambiar de contexto dentro de `f`.
pub(crate) fn with_runtime<F, R>(f: F) -> Result<R>
where
    F: FnOnce(&mut Runtime) -> R,
{
    debug_assert!(crate::preemption::is_masked(), "SIGVTALRM sin enmascarar");
    let mut guard = RUNTIME.lock().unwrap_or_else(PoisonError::into_inner);
    guard.as_mut().map(f).ok_or(ThreadError::NotInitialized)
}

/// Deja instalado el runtime. Falla si ya había uno.
pub(crate) fn install(runtime: Runtime) -> Result<()> {
    let mut guard = RUNTIME.lock().unwrap_or_else(PoisonError::into_inner);
    if guard.is_some() {
        return Err(ThreadError::AlreadyInitialized);
    }
    *guard = Some(runtime);
    Ok(())
}

/// Manejador de `SIGVTALRM`: el hilo interrumpido se captura y vuelve a la
/// cola; corre el siguiente. La señal ya está enmascarada mientras dura.
///
/// Cuando alguien retoma al hilo interrumpido, este manejador regresa y el
/// kernel restaura la máscara y los registros del código interrumpido.
pub(crate) extern "C" fn on_timer_tick(_signal: libc::c_int) {
    let Ok(dispatch) = with_runtime(|rt| rt.scheduler.preempt()) else {
        return;
    };
    // SAFETY: estamos dentro del manejador (enmascarados) y sin el lock.
    unsafe { dispatch.perform() };
    after_resume();
}

/// Se llama en cada punto donde un hilo suspendido es retomado: si main fue
/// marcado `Killed` y somos main, se apaga todo.
pub(crate) fn after_resume() {
    let killed = with_runtime(|rt| {
        rt.scheduler.current_tid() == MAIN_TID && rt.scheduler.is_main_killed()
    })
    .unwrap_or(false);
    if killed {
        shutdown();
    }
}

/// Libera todas las pilas y termina el proceso. Solo desde la pila de main.
pub(crate) fn shutdown() -> ! {
    let released = with_runtime(|rt| {
        rt.timer.disarm();
        rt.scheduler.release_all()
    })
    .unwrap_or(0);
    log::info!("main thread terminated, released {released} thread stacks");
    process::exit(0)
}

/// Primera función de todo hilo creado con `spawn`.
///
/// Si la función del usuario regresa, el hilo se termina a sí mismo.
pub(crate) extern "C" fn thread_main() -> ! {
    let entry = {
        let _cs = CriticalSection::enter();
        with_runtime(|rt| {
            let tid = rt.scheduler.current_tid();
            rt.scheduler.take_entry(tid)
        })
    };
    if let Ok(Some(entry)) = entry {
        entry();
    }

    let tid = api::current_tid();
    log::debug!("thread {tid} returned from its entry point");
    let result = api::terminate(tid);
    unreachable!("thread {tid} kept running after terminating itself: {result:?}")
}
