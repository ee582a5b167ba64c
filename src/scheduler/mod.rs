//! Planificador round-robin.
//!
//! [`Scheduler`] es un valor propio, sin estado global: guarda la tabla de
//! hilos, la cola de listos y los contadores, y expresa cada transición de la
//! máquina de estados. No cambia de pila por sí mismo; las operaciones que
//! suspenden al hilo actual devuelven un [`Dispatch`] que el llamador ejecuta
//! con la señal del temporizador enmascarada.

use crate::context::{self, Context, Stack};
use crate::uthreads::runtime::thread_main;
use crate::uthreads::{
    Config, Result, ThreadEntry, ThreadError, ThreadState, ThreadTable, Tid, MAIN_TID,
};

mod rr;
mod sleep;

pub use rr::ReadyQueue;

/// Decisión de despacho: suspender `from` y retomar `to`.
#[derive(Debug)]
#[must_use = "un despacho que no se ejecuta deja al planificador inconsistente"]
pub struct Dispatch {
    /// Hilo que deja de correr.
    pub from: Tid,
    /// Hilo que pasa a RUNNING.
    pub to: Tid,
    from_context: *mut Context,
    to_context: *const Context,
}

impl Dispatch {
    /// Captura `from` y retoma `to`. Regresa cuando alguien retome `from`.
    ///
    /// # Safety
    ///
    /// Hay que llamarlo con `SIGVTALRM` enmascarada, sin ningún lock tomado y
    /// con el planificador que lo produjo todavía vivo.
    pub unsafe fn perform(self) {
        // SAFETY: los punteros apuntan a slots de la tabla, que no se mueve.
        unsafe { context::switch(self.from_context, self.to_context) }
    }

    /// Retoma `to` sin capturar a `from`, que no se vuelve a ejecutar.
    ///
    /// # Safety
    ///
    /// Igual que [`Dispatch::perform`].
    pub unsafe fn abandon(self) -> ! {
        // SAFETY: ver `perform`.
        unsafe { context::jump(self.to_context) }
    }
}

/// Resultado de `terminate`.
#[derive(Debug)]
pub enum Termination {
    /// Se eliminó otro hilo; el actual sigue corriendo.
    Released,
    /// El hilo actual se terminó: saltar al siguiente sin volver.
    Exit(Dispatch),
    /// Main quedó `Killed` desde otro hilo: saltar a main para que apague.
    ReturnToMain(Dispatch),
    /// Main se terminó a sí mismo: apagar aquí mismo.
    Shutdown,
}

/// Estado completo del planificador.
#[derive(Debug)]
pub struct Scheduler {
    config: Config,
    threads: ThreadTable,
    ready: ReadyQueue,
    current: Tid,
    total_quanta: u64,
    /// Pila de un hilo que se terminó a sí mismo y todavía no pudo liberarse.
    pending_free: Option<Stack>,
}

impl Scheduler {
    /// Crea la tabla con main (tid 0) corriendo. El primer cuanto ya cuenta.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let mut threads = ThreadTable::new(config.max_threads);
        threads[MAIN_TID].state = ThreadState::Running;
        threads[MAIN_TID].run_count = 1;
        Ok(Self {
            config,
            threads,
            ready: ReadyQueue::with_capacity(config.max_threads),
            current: MAIN_TID,
            total_quanta: 1,
            pending_free: None,
        })
    }

    pub fn threads(&self) -> &ThreadTable {
        &self.threads
    }

    pub fn ready_queue(&self) -> &ReadyQueue {
        &self.ready
    }

    pub fn current_tid(&self) -> Tid {
        self.current
    }

    pub fn total_quanta(&self) -> u64 {
        self.total_quanta
    }

    /// Cuantos que corrió `tid`.
    pub fn quanta(&self, tid: Tid) -> Result<u64> {
        Ok(self.threads.live(tid)?.run_count)
    }

    pub fn state(&self, tid: Tid) -> Result<ThreadState> {
        Ok(self.threads.live(tid)?.state)
    }

    pub fn is_main_killed(&self) -> bool {
        self.threads[MAIN_TID].state == ThreadState::Killed
    }

    /// Indica si hay una pila esperando ser liberada.
    pub fn has_pending_free(&self) -> bool {
        self.pending_free.is_some()
    }

    // =========================
    // Transiciones
    // =========================

    /// Da de alta un hilo nuevo en el slot libre más bajo y lo encola READY.
    ///
    /// Si falla, la tabla queda exactamente como estaba.
    pub fn spawn(&mut self, entry: ThreadEntry) -> Result<Tid> {
        let tid = self
            .threads
            .find_free_slot()
            .ok_or(ThreadError::NoFreeSlot(self.threads.capacity()))?;
        let stack = Stack::new(self.config.stack_size)
            .map_err(ThreadError::StackAllocation)?;

        let tcb = &mut self.threads[tid];
        // SAFETY: el contexto vive en un slot fijo de la tabla y la pila queda
        // guardada en el mismo TCB hasta que el hilo muera.
        unsafe { tcb.context.prepare(&stack, thread_main) };
        tcb.stack = Some(stack);
        tcb.entry = Some(entry);
        tcb.state = ThreadState::Ready;
        tcb.run_count = 0;
        tcb.wake_at = None;
        self.ready.push(tid);
        Ok(tid)
    }

    /// Termina `tid`.
    ///
    /// - Otro hilo: se libera su pila ya.
    /// - El actual: su pila queda pendiente y se despacha al siguiente.
    /// - Main: queda `Killed`; si no es el actual, hay que volver a main.
    pub fn terminate(&mut self, tid: Tid) -> Result<Termination> {
        self.threads.check(tid)?;
        if tid == MAIN_TID {
            self.threads[MAIN_TID].state = ThreadState::Killed;
            if self.current == MAIN_TID {
                return Ok(Termination::Shutdown);
            }
            let from = self.current;
            self.current = MAIN_TID;
            return Ok(Termination::ReturnToMain(self.dispatch(from, MAIN_TID)));
        }

        self.threads.live(tid)?;
        let stack = self.threads.release(tid, &mut self.ready);
        if tid != self.current {
            drop(stack);
            return Ok(Termination::Released);
        }

        // Seguimos ejecutando sobre `stack`: se libera en el próximo punto seguro.
        self.drain_pending_free();
        self.pending_free = stack;
        Ok(Termination::Exit(self.schedule()))
    }

    /// Bloquea `tid`. Si es el actual, devuelve el despacho al siguiente.
    pub fn block(&mut self, tid: Tid) -> Result<Option<Dispatch>> {
        self.threads.check(tid)?;
        if tid == MAIN_TID {
            return Err(ThreadError::BlockMain);
        }
        let current = self.current;
        let tcb = self.threads.live_mut(tid)?;
        match tcb.state {
            ThreadState::Blocked => Ok(None),
            ThreadState::Sleeping | ThreadState::SleepingAndBlocked => {
                tcb.state = ThreadState::SleepingAndBlocked;
                Ok(None)
            }
            _ if tid == current => {
                tcb.state = ThreadState::Blocked;
                Ok(Some(self.switch_away()))
            }
            _ => {
                tcb.state = ThreadState::Blocked;
                self.ready.remove(tid);
                Ok(None)
            }
        }
    }

    /// Reanuda `tid`: `Blocked` → `Ready`, `SleepingAndBlocked` → `Sleeping`.
    /// En cualquier otro estado no hace nada.
    pub fn resume(&mut self, tid: Tid) -> Result<()> {
        let tcb = self.threads.live_mut(tid)?;
        match tcb.state {
            ThreadState::Blocked => {
                tcb.state = ThreadState::Ready;
                self.ready.push(tid);
            }
            ThreadState::SleepingAndBlocked => tcb.state = ThreadState::Sleeping,
            _ => {}
        }
        Ok(())
    }

    /// Duerme al hilo actual `quanta` cuantos y devuelve el despacho al siguiente.
    pub fn sleep(&mut self, quanta: u64) -> Result<Dispatch> {
        if self.current == MAIN_TID {
            return Err(ThreadError::SleepMain);
        }
        if quanta == 0 {
            return Err(ThreadError::InvalidSleep);
        }
        let wake_at = self.total_quanta + quanta;
        let tcb = &mut self.threads[self.current];
        tcb.wake_at = Some(wake_at);
        tcb.state = ThreadState::Sleeping;
        Ok(self.switch_away())
    }

    /// Expropiación por el temporizador: el hilo actual vuelve a la cola.
    pub fn preempt(&mut self) -> Dispatch {
        self.switch_away()
    }

    /// Libera la pila pendiente, si la hay.
    ///
    /// Solo es seguro desde un hilo distinto al que la dejó pendiente, cosa
    /// que siempre pasa: ese hilo no vuelve a correr.
    pub fn drain_pending_free(&mut self) {
        drop(self.pending_free.take());
    }

    /// Apagado: libera todas las pilas. Devuelve cuántas se liberaron.
    pub fn release_all(&mut self) -> usize {
        let mut released = usize::from(self.pending_free.take().is_some());
        for tid in 1..self.threads.capacity() {
            if self.threads.release(tid, &mut self.ready).is_some() {
                released += 1;
            }
        }
        released
    }

    /// Entrega la función de entrada de `tid` (una sola vez).
    pub(crate) fn take_entry(&mut self, tid: Tid) -> Option<ThreadEntry> {
        self.threads.live_mut(tid).ok()?.entry.take()
    }

    // =========================
    // Despacho
    // =========================

    fn switch_away(&mut self) -> Dispatch {
        self.drain_pending_free();
        self.schedule()
    }

    /// Una decisión de planificación:
    /// 1) despertar dormidos, 2) contar el cuanto, 3) reencolar al saliente
    /// si sigue RUNNING, 4) sacar el primero de la cola, 5) marcarlo RUNNING.
    fn schedule(&mut self) -> Dispatch {
        sleep::sweep_sleepers(&mut self.threads, &mut self.ready, self.total_quanta);
        self.total_quanta += 1;

        let from = self.current;
        if self.threads[from].state == ThreadState::Running {
            self.threads[from].state = ThreadState::Ready;
            self.ready.push(from);
        }

        // Main siempre es planificable salvo que esté muriendo, así que la
        // cola solo queda vacía si algo rompió los invariantes.
        debug_assert!(!self.ready.is_empty(), "cola de listos vacía");
        let to = self.ready.pick().unwrap_or(MAIN_TID);
        self.current = to;
        let next = &mut self.threads[to];
        next.state = ThreadState::Running;
        next.run_count += 1;

        self.dispatch(from, to)
    }

    fn dispatch(&mut self, from: Tid, to: Tid) -> Dispatch {
        Dispatch {
            from,
            to,
            from_context: self.threads.context_ptr(from),
            to_context: self.threads.context_ptr(to),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uthreads::ThreadControlBlock;

    fn scheduler(max_threads: usize) -> Scheduler {
        let config = Config::new(1000)
            .with_max_threads(max_threads)
            .with_stack_size(16 * 1024);
        Scheduler::new(config).unwrap()
    }

    fn spawn(s: &mut Scheduler) -> Tid {
        s.spawn(Box::new(|| {})).unwrap()
    }

    /// Despacha `n` veces por expropiación y devuelve a quién le tocó.
    fn run_quanta(s: &mut Scheduler, n: usize) -> Vec<Tid> {
        (0..n).map(|_| s.preempt().to).collect()
    }

    fn assert_queue_matches_states(s: &Scheduler) {
        for tcb in s.threads().iter() {
            assert_eq!(
                s.ready_queue().contains(tcb.id),
                tcb.state == ThreadState::Ready,
                "tid {} en estado {:?}",
                tcb.id,
                tcb.state
            );
        }
        let is_running = |t: &&ThreadControlBlock| t.state == ThreadState::Running;
        let running = s.threads().iter().filter(is_running).count();
        assert_eq!(running, 1);
    }

    #[test]
    fn init_precounts_the_first_quantum() {
        let s = scheduler(4);
        assert_eq!(s.total_quanta(), 1);
        assert_eq!(s.current_tid(), MAIN_TID);
        assert_eq!(s.quanta(MAIN_TID).unwrap(), 1);
        assert_eq!(s.state(MAIN_TID).unwrap(), ThreadState::Running);
    }

    #[test]
    fn zero_quantum_fails() {
        assert!(matches!(
            Scheduler::new(Config::new(0)),
            Err(ThreadError::InvalidQuantum)
        ));
    }

    #[test]
    fn spawn_fills_lowest_slots_until_exhausted() {
        let mut s = scheduler(3);
        assert_eq!(spawn(&mut s), 1);
        assert_eq!(spawn(&mut s), 2);
        assert!(matches!(s.spawn(Box::new(|| {})), Err(ThreadError::NoFreeSlot(3))));
        assert_eq!(s.ready_queue().iter().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(s.quanta(1).unwrap(), 0);
        assert_queue_matches_states(&s);
    }

    #[test]
    fn failed_stack_allocation_leaves_the_table_untouched() {
        // Pasa la validación pero ningún mmap puede darnos 2^63 bytes.
        let config = Config::new(1000)
            .with_max_threads(3)
            .with_stack_size(usize::MAX / 2);
        let mut s = Scheduler::new(config).unwrap();

        assert!(matches!(
            s.spawn(Box::new(|| {})),
            Err(ThreadError::StackAllocation(_))
        ));
        assert!(s.ready_queue().is_empty());
        assert_eq!(s.threads().find_free_slot(), Some(1));
        assert!(matches!(s.state(1), Err(ThreadError::NoSuchThread(1))));
        assert_queue_matches_states(&s);
    }

    #[test]
    fn round_robin_includes_main() {
        let mut s = scheduler(4);
        let a = spawn(&mut s);
        let b = spawn(&mut s);

        let order = run_quanta(&mut s, 4);

        assert_eq!(order, vec![a, b, MAIN_TID, a]);
        assert_eq!(s.total_quanta(), 5);
        assert_eq!(s.quanta(MAIN_TID).unwrap(), 2);
        assert_eq!(s.quanta(a).unwrap(), 2);
        assert_eq!(s.quanta(b).unwrap(), 1);
        assert_queue_matches_states(&s);
    }

    #[test]
    fn run_counts_grow_by_one_per_rotation() {
        let mut s = scheduler(8);
        let tids: Vec<Tid> = (0..5).map(|_| spawn(&mut s)).collect();
        run_quanta(&mut s, 6);
        let before: Vec<u64> = tids.iter().map(|&t| s.quanta(t).unwrap()).collect();
        run_quanta(&mut s, 6);
        for (i, &tid) in tids.iter().enumerate() {
            assert_eq!(s.quanta(tid).unwrap(), before[i] + 1);
        }
        let total: u64 = s.threads().iter().map(|t| t.run_count).sum();
        assert_eq!(total, s.total_quanta());
    }

    #[test]
    fn preempting_a_lone_main_redispatches_main() {
        let mut s = scheduler(2);
        let d = s.preempt();
        assert_eq!((d.from, d.to), (MAIN_TID, MAIN_TID));
        assert_eq!(s.quanta(MAIN_TID).unwrap(), 2);
    }

    #[test]
    fn sleep_wakes_at_exact_quantum() {
        let mut s = scheduler(4);
        let a = spawn(&mut s);
        assert_eq!(s.preempt().to, a);
        let called_at = s.total_quanta();

        let d = s.sleep(3).unwrap();
        assert_eq!((d.from, d.to), (a, MAIN_TID));
        assert_eq!(s.state(a).unwrap(), ThreadState::Sleeping);
        assert_eq!(s.threads()[a].wake_at, Some(called_at + 3));

        // Mientras el contador no llegue a called_at + 3, sigue dormido.
        while s.total_quanta() < called_at + 3 {
            assert_eq!(s.preempt().to, MAIN_TID);
            assert_eq!(s.state(a).unwrap(), ThreadState::Sleeping);
        }
        assert_eq!(s.preempt().to, a);
        assert_eq!(s.total_quanta(), called_at + 4);
        assert_eq!(s.threads()[a].wake_at, None);
        assert_queue_matches_states(&s);
    }

    #[test]
    fn main_cannot_sleep_and_sleep_must_be_positive() {
        let mut s = scheduler(3);
        assert!(matches!(s.sleep(1), Err(ThreadError::SleepMain)));
        let a = spawn(&mut s);
        assert_eq!(s.preempt().to, a);
        assert!(matches!(s.sleep(0), Err(ThreadError::InvalidSleep)));
        assert_eq!(s.state(a).unwrap(), ThreadState::Running);
    }

    #[test]
    fn blocking_self_reschedules_until_resumed() {
        let mut s = scheduler(4);
        let a = spawn(&mut s);
        let b = spawn(&mut s);
        assert_eq!(s.preempt().to, a);

        let d = s.block(a).unwrap().expect("bloquearse a sí mismo despacha");
        assert_eq!((d.from, d.to), (a, b));
        assert!(!s.ready_queue().contains(a));

        assert_eq!(run_quanta(&mut s, 4), vec![MAIN_TID, b, MAIN_TID, b]);

        s.resume(a).unwrap();
        assert_eq!(s.state(a).unwrap(), ThreadState::Ready);
        assert_eq!(run_quanta(&mut s, 2), vec![MAIN_TID, a]);
        assert_queue_matches_states(&s);
    }

    #[test]
    fn blocking_another_thread_pulls_it_from_the_queue() {
        let mut s = scheduler(4);
        let a = spawn(&mut s);
        let b = spawn(&mut s);

        assert!(s.block(a).unwrap().is_none());
        assert_eq!(s.state(a).unwrap(), ThreadState::Blocked);
        // Bloquear dos veces no es error.
        assert!(s.block(a).unwrap().is_none());

        assert_eq!(run_quanta(&mut s, 3), vec![b, MAIN_TID, b]);
        assert_queue_matches_states(&s);
    }

    #[test]
    fn block_rejects_main_and_unknown_threads() {
        let mut s = scheduler(3);
        assert!(matches!(s.block(MAIN_TID), Err(ThreadError::BlockMain)));
        assert!(matches!(s.block(1), Err(ThreadError::NoSuchThread(1))));
        assert!(matches!(s.block(9), Err(ThreadError::InvalidTid(9))));
        assert!(matches!(s.resume(2), Err(ThreadError::NoSuchThread(2))));
    }

    #[test]
    fn resume_of_sleeping_and_blocked_keeps_sleeping() {
        let mut s = scheduler(4);
        let a = spawn(&mut s);
        assert_eq!(s.preempt().to, a);
        let called_at = s.total_quanta();
        let _ = s.sleep(4).unwrap();

        assert!(s.block(a).unwrap().is_none());
        assert_eq!(s.state(a).unwrap(), ThreadState::SleepingAndBlocked);

        s.resume(a).unwrap();
        assert_eq!(s.state(a).unwrap(), ThreadState::Sleeping);
        assert!(!s.ready_queue().contains(a));

        while s.total_quanta() <= called_at + 4 {
            let _ = s.preempt();
        }
        assert_eq!(s.state(a).unwrap(), ThreadState::Running);
    }

    #[test]
    fn wake_while_blocked_leaves_plain_blocked() {
        let mut s = scheduler(4);
        let a = spawn(&mut s);
        assert_eq!(s.preempt().to, a);
        let called_at = s.total_quanta();
        let _ = s.sleep(2).unwrap();
        assert!(s.block(a).unwrap().is_none());

        while s.total_quanta() <= called_at + 2 {
            assert_eq!(s.preempt().to, MAIN_TID);
        }
        assert_eq!(s.state(a).unwrap(), ThreadState::Blocked);
        assert_eq!(s.threads()[a].wake_at, None);

        s.resume(a).unwrap();
        assert_eq!(run_quanta(&mut s, 1), vec![a]);
    }

    #[test]
    fn resume_main_is_a_no_op() {
        let mut s = scheduler(2);
        s.resume(MAIN_TID).unwrap();
        assert_eq!(s.state(MAIN_TID).unwrap(), ThreadState::Running);
        assert!(s.ready_queue().is_empty());
    }

    #[test]
    fn terminating_another_thread_frees_it_now() {
        let mut s = scheduler(4);
        let a = spawn(&mut s);
        let b = spawn(&mut s);

        assert!(matches!(s.terminate(a).unwrap(), Termination::Released));
        assert!(matches!(s.quanta(a), Err(ThreadError::NoSuchThread(_))));
        assert!(!s.has_pending_free());
        assert_eq!(run_quanta(&mut s, 2), vec![b, MAIN_TID]);

        // El slot se reutiliza.
        assert_eq!(spawn(&mut s), a);
    }

    #[test]
    fn self_termination_defers_the_stack_until_next_pass() {
        let mut s = scheduler(4);
        let a = spawn(&mut s);
        let b = spawn(&mut s);
        assert_eq!(s.preempt().to, a);

        let Termination::Exit(d) = s.terminate(a).unwrap() else {
            panic!("terminarse a sí mismo debe despachar");
        };
        assert_eq!((d.from, d.to), (a, b));
        assert!(s.has_pending_free());
        assert!(matches!(s.state(a), Err(ThreadError::NoSuchThread(_))));

        let _ = s.preempt();
        assert!(!s.has_pending_free());
    }

    #[test]
    fn back_to_back_self_terminations_never_leak() {
        let mut s = scheduler(4);
        let a = spawn(&mut s);
        let b = spawn(&mut s);
        assert_eq!(s.preempt().to, a);
        let _ = s.terminate(a).unwrap();
        assert_eq!(s.current_tid(), b);

        // b muere antes de que dispare el temporizador.
        let Termination::Exit(d) = s.terminate(b).unwrap() else {
            panic!("terminarse a sí mismo debe despachar");
        };
        assert_eq!(d.to, MAIN_TID);
        assert!(s.has_pending_free());
        assert!(s.threads().iter().all(|t| t.stack.is_none()));
    }

    #[test]
    fn terminating_main_from_another_thread_returns_to_main() {
        let mut s = scheduler(3);
        let a = spawn(&mut s);
        assert_eq!(s.preempt().to, a);

        let Termination::ReturnToMain(d) = s.terminate(MAIN_TID).unwrap() else {
            panic!("debe volver a main");
        };
        assert_eq!((d.from, d.to), (a, MAIN_TID));
        assert!(s.is_main_killed());
        assert_eq!(s.current_tid(), MAIN_TID);
        assert_eq!(s.release_all(), 1);
    }

    #[test]
    fn main_terminating_itself_shuts_down_inline() {
        let mut s = scheduler(3);
        spawn(&mut s);
        spawn(&mut s);
        assert!(matches!(s.terminate(MAIN_TID).unwrap(), Termination::Shutdown));
        assert!(s.is_main_killed());
        assert_eq!(s.release_all(), 2);
        assert!(s.ready_queue().is_empty());
    }

    #[test]
    fn terminate_rejects_unused_and_out_of_range() {
        let mut s = scheduler(3);
        assert!(matches!(s.terminate(2), Err(ThreadError::NoSuchThread(2))));
        assert!(matches!(s.terminate(3), Err(ThreadError::InvalidTid(3))));
    }

    #[test]
    fn queries_are_monotonic() {
        let mut s = scheduler(4);
        let a = spawn(&mut s);
        let mut last_total = s.total_quanta();
        let mut last_a = s.quanta(a).unwrap();
        for _ in 0..10 {
            let _ = s.preempt();
            assert!(s.total_quanta() > last_total);
            assert!(s.quanta(a).unwrap() >= last_a);
            last_total = s.total_quanta();
            last_a = s.quanta(a).unwrap();
        }
    }

    #[test]
    fn entries_are_handed_out_once() {
        let mut s = scheduler(2);
        let a = spawn(&mut s);
        assert!(!s.threads()[a].has_started());
        assert!(s.take_entry(a).is_some());
        assert!(s.take_entry(a).is_none());
        assert!(s.threads()[a].has_started());
    }

    #[test]
    fn independent_schedulers_do_not_share_state() {
        let mut one = scheduler(3);
        let two = scheduler(3);
        spawn(&mut one);
        let _ = one.preempt();
        assert_eq!(one.total_quanta(), 2);
        assert_eq!(two.total_quanta(), 1);
        assert!(two.ready_queue().is_empty());
    }
}
