use std::io;

use thiserror::Error;

use super::thread::Tid;

/// Errores recuperables de la biblioteca.
///
/// Todos se detectan y se reportan en la llamada que los provoca; ninguno
/// cruza un cambio de contexto. Las fallas del entorno (temporizador, señales)
/// no aparecen aquí: terminan el proceso.
#[derive(Debug, Error)]
pub enum ThreadError {
    /// El largo del cuanto debe ser positivo.
    #[error("quantum length must be positive")]
    InvalidQuantum,

    /// Configuración inconsistente (pila muy chica, tabla vacía...).
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// Se llamó a la biblioteca antes de `init`.
    #[error("thread library is not initialized")]
    NotInitialized,

    /// `init` se llamó dos veces.
    #[error("thread library is already initialized")]
    AlreadyInitialized,

    /// El tid no entra en la tabla.
    #[error("thread id {0} is out of range")]
    InvalidTid(Tid),

    /// El slot existe pero no tiene un hilo vivo.
    #[error("thread {0} does not exist")]
    NoSuchThread(Tid),

    /// Punto de entrada nulo (solo en la fachada `uthread_*`).
    #[error("missing thread entry point")]
    MissingEntry,

    /// No quedan slots libres.
    #[error("no free thread slot (limit is {0} threads)")]
    NoFreeSlot(usize),

    /// El sistema no pudo darnos una pila.
    #[error("failed to allocate a thread stack: {0}")]
    StackAllocation(#[source] io::Error),

    /// El hilo main no se puede bloquear.
    #[error("the main thread cannot be blocked")]
    BlockMain,

    /// El hilo main no puede dormir.
    #[error("the main thread cannot sleep")]
    SleepMain,

    /// Dormir cero cuantos no tiene sentido.
    #[error("sleep length must be positive")]
    InvalidSleep,
}

/// Resultado de las operaciones de la biblioteca.
pub type Result<T, E = ThreadError> = std::result::Result<T, E>;
