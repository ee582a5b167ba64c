use std::fmt;
use std::ops::{Deref, DerefMut};

use crate::context::{Context, Stack};
use crate::scheduler::ReadyQueue;

use super::error::{Result, ThreadError};

// =========================
// Tipos básicos y estados
// =========================

/// Identificador lógico de un hilo dentro de nuestra biblioteca.
/// Es simplemente el índice dentro de la tabla de hilos.
pub type Tid = usize;

/// Slot reservado para el hilo que ya existía al llamar `init`.
pub const MAIN_TID: Tid = 0;

/// Función que ejecuta un hilo. Se consume una sola vez, al arrancar.
pub type ThreadEntry = Box<dyn FnOnce() + Send + 'static>;

/// Estado en el que puede estar un hilo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Ready,
    Running,
    Blocked,
    Sleeping,
    /// Dormido y además bloqueado explícitamente.
    SleepingAndBlocked,
    /// Solo main: se pidió su terminación y el proceso se está apagando.
    Killed,
}

/// Estructura que representa a **un hilo** dentro de la biblioteca.
pub struct ThreadControlBlock {
    /// ID único del hilo dentro de la tabla.
    pub id: Tid,
    /// Estado actual del hilo.
    pub state: ThreadState,
    /// Cuantos en los que este hilo fue despachado como RUNNING.
    pub run_count: u64,
    /// Cuanto global en el que un hilo dormido vuelve a ser elegible.
    pub wake_at: Option<u64>,
    /// Pila propia. `None` en slots libres y en main (usa la del proceso).
    pub(crate) stack: Option<Stack>,
    /// Dónde retomar este hilo.
    pub(crate) context: Context,
    /// Función que este hilo debe ejecutar cuando se le asigne CPU por primera vez.
    pub(crate) entry: Option<ThreadEntry>,
}

impl ThreadControlBlock {
    fn unused(id: Tid) -> Self {
        Self {
            id,
            state: ThreadState::Blocked,
            run_count: 0,
            wake_at: None,
            stack: None,
            context: Context::empty(),
            entry: None,
        }
    }

    /// Un slot está en uso si es main o si tiene pila.
    pub fn is_live(&self) -> bool {
        self.id == MAIN_TID || self.stack.is_some()
    }

    /// Indica si el hilo ya consumió su función de entrada.
    pub fn has_started(&self) -> bool {
        self.entry.is_none()
    }
}

impl fmt::Debug for ThreadControlBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadControlBlock")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("run_count", &self.run_count)
            .field("wake_at", &self.wake_at)
            .field("has_stack", &self.stack.is_some())
            .finish()
    }
}

// =========================
// Tabla de hilos
// =========================

/// Tabla de capacidad fija con un TCB por slot.
///
/// Los slots nunca se mueven de lugar: los contextos sintéticos guardan la
/// dirección de su propio `Context`.
pub struct ThreadTable {
    slots: Box<[ThreadControlBlock]>,
}

impl ThreadTable {
    /// Crea `capacity` slots libres. El slot 0 queda listo para main.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(ThreadControlBlock::unused).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Valida que `tid` entre en la tabla.
    pub fn check(&self, tid: Tid) -> Result<()> {
        if tid < self.slots.len() {
            Ok(())
        } else {
            Err(ThreadError::InvalidTid(tid))
        }
    }

    /// TCB de un hilo vivo.
    pub fn live(&self, tid: Tid) -> Result<&ThreadControlBlock> {
        self.check(tid)?;
        let tcb = &self.slots[tid];
        if tcb.is_live() {
            Ok(tcb)
        } else {
            Err(ThreadError::NoSuchThread(tid))
        }
    }

    /// Igual que [`ThreadTable::live`], con acceso mutable.
    pub fn live_mut(&mut self, tid: Tid) -> Result<&mut ThreadControlBlock> {
        self.live(tid)?;
        Ok(&mut self.slots[tid])
    }

    /// Slot libre de menor índice (nunca el 0).
    pub fn find_free_slot(&self) -> Option<Tid> {
        self.slots
            .iter()
            .skip(1)
            .find(|tcb| tcb.stack.is_none())
            .map(|tcb| tcb.id)
    }

    /// Saca al hilo `tid` de toda planificación: cola de listos, temporizador
    /// de sueño y función pendiente. Devuelve su pila para que el llamador
    /// decida si la libera ya o la difiere; no toca quién está corriendo.
    pub fn release(&mut self, tid: Tid, ready: &mut ReadyQueue) -> Option<Stack> {
        ready.remove(tid);
        let tcb = &mut self.slots[tid];
        tcb.state = ThreadState::Blocked;
        tcb.wake_at = None;
        tcb.entry = None;
        tcb.stack.take()
    }

    /// Puntero al contexto de `tid`, estable mientras viva la tabla.
    pub(crate) fn context_ptr(&mut self, tid: Tid) -> *mut Context {
        debug_assert!(tid < self.slots.len());
        // SAFETY: `tid` está en rango; no se crea ninguna referencia intermedia.
        unsafe { &raw mut (*self.slots.as_mut_ptr().add(tid)).context }
    }
}

impl Deref for ThreadTable {
    type Target = [ThreadControlBlock];

    fn deref(&self) -> &Self::Target {
        &self.slots
    }
}

impl DerefMut for ThreadTable {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.slots
    }
}

impl fmt::Debug for ThreadTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.slots.iter().filter(|tcb| tcb.is_live()))
            .finish()
    }
}
