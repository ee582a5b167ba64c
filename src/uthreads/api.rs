use log::{debug, warn};

use crate::preemption::{self, CriticalSection, VirtualTimer};
use crate::scheduler::{Dispatch, Scheduler, Termination};

use super::config::Config;
use super::error::{Result, ThreadError};
use super::runtime::{self, with_runtime, Runtime};
use super::thread::{ThreadControlBlock, ThreadState, Tid, MAIN_TID};

// =========================
// API de la biblioteca
// =========================
//
// Cada operación enmascara SIGVTALRM antes de tocar el planificador y la
// desenmascara al volver al código del usuario (la guarda `_cs`).

/// Inicializa la biblioteca con cuantos de `quantum_usecs` microsegundos.
///
/// El hilo que llama pasa a ser main (tid 0) y su primer cuanto ya cuenta.
///
/// ```rust,no_run
/// uthreads::init(10_000).unwrap();
/// assert_eq!(uthreads::total_quanta(), 1);
/// ```
pub fn init(quantum_usecs: u64) -> Result<()> {
    init_with(Config::new(quantum_usecs))
}

/// Igual que [`init`], con tamaño de pila y cantidad de slots a elección.
pub fn init_with(config: Config) -> Result<()> {
    let _cs = CriticalSection::enter();
    let scheduler = Scheduler::new(config)?;
    let timer = VirtualTimer::new(config.quantum_usecs);
    runtime::install(Runtime { scheduler, timer })?;

    preemption::install_handler(runtime::on_timer_tick);
    timer.arm();
    debug!(
        "uthreads initialized: quantum {:?}, {} slots, {} byte stacks",
        config.quantum(),
        config.max_threads,
        config.stack_size
    );
    Ok(())
}

/// Crea un hilo nuevo que ejecutará `entry` cuando le toque CPU.
///
/// Devuelve el tid (el slot libre más bajo). Si `entry` regresa, el hilo se
/// termina solo.
///
/// Si el hilo muere por [`terminate`] (propio o de otro hilo), sus marcos
/// quedan abandonados y la pila se desmapea: lo que `entry` capturó y las
/// variables locales vivas en ese momento nunca ejecutan `Drop`.
///
/// ```rust,no_run
/// uthreads::init(10_000).unwrap();
/// let tid = uthreads::spawn(|| loop {
///     // trabajo del hilo
/// })
/// .unwrap();
/// assert_eq!(tid, 1);
/// ```
pub fn spawn<F>(entry: F) -> Result<Tid>
where
    F: FnOnce() + Send + 'static,
{
    let _cs = CriticalSection::enter();
    let tid = with_runtime(|rt| rt.scheduler.spawn(Box::new(entry)))??;
    debug!("spawned thread {tid}");
    Ok(tid)
}

/// Termina el hilo `tid`.
///
/// - Si es otro hilo, se libera ya y la llamada regresa.
/// - Si es el hilo que llama, no regresa.
/// - Si es main, el proceso termina (con código 0) después de liberar todas las pilas.
pub fn terminate(tid: Tid) -> Result<()> {
    let _cs = CriticalSection::enter();
    let termination = with_runtime(|rt| -> Result<Termination> {
        let termination = rt.scheduler.terminate(tid)?;
        if matches!(termination, Termination::Exit(_)) {
            rt.timer.arm();
        }
        Ok(termination)
    })??;

    match termination {
        Termination::Released => {
            debug!("terminated thread {tid}");
            Ok(())
        }
        Termination::Exit(dispatch) => {
            let next = dispatch.to;
            debug!("thread {tid} terminated itself, switching to {next}");
            // SAFETY: enmascarados y sin el lock; esta pila no se retoma.
            unsafe { dispatch.abandon() }
        }
        Termination::ReturnToMain(dispatch) => {
            let killer = dispatch.from;
            debug!("thread {killer} terminated main, returning to main to shut down");
            // SAFETY: main quedó suspendido en el manejador y ahí ve el `Killed`.
            unsafe { dispatch.abandon() }
        }
        Termination::Shutdown => runtime::shutdown(),
    }
}

/// Bloquea `tid` hasta que alguien llame a [`resume`].
///
/// Si `tid` es el hilo que llama, cede la CPU y regresa cuando lo reanuden.
/// Bloquear un hilo ya bloqueado no hace nada.
pub fn block(tid: Tid) -> Result<()> {
    let _cs = CriticalSection::enter();
    let dispatch = with_runtime(|rt| -> Result<Option<Dispatch>> {
        let dispatch = rt.scheduler.block(tid)?;
        if dispatch.is_some() {
            rt.timer.arm();
        }
        Ok(dispatch)
    })??;
    debug!("blocked thread {tid}");
    if let Some(dispatch) = dispatch {
        suspend(dispatch);
    }
    Ok(())
}

/// Reanuda un hilo bloqueado. Si además dormía, sigue durmiendo.
pub fn resume(tid: Tid) -> Result<()> {
    let _cs = CriticalSection::enter();
    with_runtime(|rt| rt.scheduler.resume(tid))??;
    debug!("resumed thread {tid}");
    Ok(())
}

/// Duerme al hilo que llama durante `quanta` cuantos.
///
/// Main no puede dormir.
pub fn sleep(quanta: u64) -> Result<()> {
    let _cs = CriticalSection::enter();
    let dispatch = with_runtime(|rt| -> Result<Dispatch> {
        let dispatch = rt.scheduler.sleep(quanta)?;
        rt.timer.arm();
        Ok(dispatch)
    })??;
    debug!("thread {} sleeps for {quanta} quanta", dispatch.from);
    suspend(dispatch);
    Ok(())
}

/// Tid del hilo que está corriendo (0 antes de `init`).
pub fn current_tid() -> Tid {
    let _cs = CriticalSection::enter();
    with_runtime(|rt| rt.scheduler.current_tid())
        .unwrap_or(MAIN_TID)
}

/// Cuantos iniciados desde `init`, incluido el actual (0 antes de `init`).
pub fn total_quanta() -> u64 {
    let _cs = CriticalSection::enter();
    with_runtime(|rt| rt.scheduler.total_quanta()).unwrap_or(0)
}

/// Cuantos en los que corrió `tid`, incluido el actual si está corriendo.
pub fn quanta(tid: Tid) -> Result<u64> {
    let _cs = CriticalSection::enter();
    with_runtime(|rt| rt.scheduler.quanta(tid))?
}

/// Estado de un hilo vivo.
pub fn thread_state(tid: Tid) -> Result<ThreadState> {
    let _cs = CriticalSection::enter();
    with_runtime(|rt| rt.scheduler.state(tid))?
}

/// Ejecuta `f` con acceso **solo lectura** a la tabla de hilos.
///
/// `f` corre con la expropiación enmascarada y con el estado global tomado,
/// así que debe ser corta y **no** puede llamar a ninguna función de esta
/// biblioteca: volver a tomar el estado desde `f` se traba o entra en pánico.
/// Hay que copiar lo necesario y consultar después.
///
/// ```rust,no_run
/// uthreads::init(10_000).unwrap();
/// let live = uthreads::with_threads(|threads| {
///     threads.iter().filter(|t| t.is_live()).count()
/// })
/// .unwrap();
/// assert_eq!(live, 1);
/// ```
pub fn with_threads<F, R>(f: F) -> Result<R>
where
    F: FnOnce(&[ThreadControlBlock]) -> R,
{
    let _cs = CriticalSection::enter();
    with_runtime(|rt| f(rt.scheduler.threads()))
}

fn suspend(dispatch: Dispatch) {
    // SAFETY: seguimos dentro de la sección crítica del llamador y el lock
    // ya se soltó.
    unsafe { dispatch.perform() };
    runtime::after_resume();
}

// =========================
// Fachada con códigos enteros
// =========================
//
// Misma semántica que la API de arriba, con el contrato clásico:
// 0 / tid / cantidad si sale bien, -1 si falla.

/// Punto de entrada para [`uthread_spawn`].
pub type ThreadEntryPoint = fn();

const FAILURE: i32 = -1;

fn report<T>(operation: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            warn!("thread library error: {operation}: {err}");
            None
        }
    }
}

fn status(operation: &str, result: Result<()>) -> i32 {
    report(operation, result).map_or(FAILURE, |()| 0)
}

fn count(value: u64) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn to_tid(operation: &str, tid: i32) -> Option<Tid> {
    let tid = Tid::try_from(tid).ok();
    if tid.is_none() {
        warn!("thread library error: {operation}: negative thread id");
    }
    tid
}

/// Envoltorio para [`init`]. `quantum_usecs <= 0` devuelve -1.
pub fn uthread_init(quantum_usecs: i32) -> i32 {
    let quantum = u64::try_from(quantum_usecs)
        .map_err(|_| ThreadError::InvalidQuantum);
    status("init", quantum.and_then(init))
}

/// Envoltorio para [`spawn`]: devuelve el tid o -1.
pub fn uthread_spawn(entry_point: Option<ThreadEntryPoint>) -> i32 {
    let result = entry_point.ok_or(ThreadError::MissingEntry).and_then(spawn);
    report("spawn", result)
        .map_or(FAILURE, |tid| count(tid as u64))
}

/// Envoltorio para [`terminate`].
pub fn uthread_terminate(tid: i32) -> i32 {
    to_tid("terminate", tid)
        .map_or(FAILURE, |tid| status("terminate", terminate(tid)))
}

/// Envoltorio para [`block`].
pub fn uthread_block(tid: i32) -> i32 {
    to_tid("block", tid)
        .map_or(FAILURE, |tid| status("block", block(tid)))
}

/// Envoltorio para [`resume`].
pub fn uthread_resume(tid: i32) -> i32 {
    to_tid("resume", tid)
        .map_or(FAILURE, |tid| status("resume", resume(tid)))
}

/// Envoltorio para [`sleep`]. `num_quantums <= 0` devuelve -1.
pub fn uthread_sleep(num_quantums: i32) -> i32 {
    let quanta = u64::try_from(num_quantums)
        .map_err(|_| ThreadError::InvalidSleep);
    status("sleep", quanta.and_then(sleep))
}

/// Envoltorio para [`current_tid`].
pub fn uthread_get_tid() -> i32 {
    count(current_tid() as u64)
}

/// Envoltorio para [`total_quanta`].
pub fn uthread_get_total_quantums() -> i32 {
    count(total_quanta())
}

/// Envoltorio para [`quanta`]: -1 si el tid está fuera de rango o libre.
pub fn uthread_get_quantums(tid: i32) -> i32 {
    to_tid("get_quantums", tid)
        .and_then(|tid| report("get_quantums", quanta(tid)))
        .map_or(FAILURE, count)
}
