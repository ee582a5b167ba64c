//! Primitiva de contexto de ejecución.
//!
//! Un [`Context`] guarda lo necesario para suspender una pila de llamadas y
//! retomarla más tarde:
//! - el puntero de pila donde quedaron apilados los registros callee-saved,
//! - la máscara de señales vigente en el momento de la suspensión.
//!
//! Todo lo que depende de la arquitectura (el ensamblador del cambio de pila y
//! el marco inicial de un hilo que nunca corrió) vive en [`x86_64`]. El resto
//! de la biblioteca solo maneja valores `Context` opacos.

use std::fmt;
use std::mem::MaybeUninit;
use std::ptr;

pub mod stack;
mod x86_64;

pub use stack::Stack;

/// Estado suficiente para retomar un hilo donde se suspendió.
pub struct Context {
    /// Puntero de pila guardado. `0` si el contexto nunca se capturó.
    stack_pointer: usize,
    /// Máscara de señales al momento de suspender (o la inicial, vacía).
    signal_mask: libc::sigset_t,
}

impl Context {
    /// Contexto vacío: todavía no se capturó nada aquí.
    ///
    /// Es el estado del hilo main hasta su primera suspensión.
    pub fn empty() -> Self {
        Self {
            stack_pointer: 0,
            signal_mask: empty_sigset(),
        }
    }

    /// Indica si hay algo que retomar en este contexto.
    pub(crate) fn is_captured(&self) -> bool {
        self.stack_pointer != 0
    }

    /// Sintetiza el contexto de un hilo que nunca corrió, como si hubiera
    /// llamado a [`switch`] desde adentro de sí mismo:
    /// - el puntero de pila apunta al tope de `stack`,
    /// - el contador de programa apunta (vía trampolín) a `entry`,
    /// - la máscara de señales queda vacía.
    ///
    /// # Safety
    ///
    /// `self` no se puede mover mientras el hilo no haya arrancado: el
    /// trampolín recibe su dirección. `stack` debe seguir mapeada hasta que
    /// nadie vuelva a ejecutar sobre ella.
    pub unsafe fn prepare(&mut self, stack: &Stack, entry: extern "C" fn() -> !) {
        self.signal_mask = empty_sigset();
        let this: *const Context = self;
        // SAFETY: el tope pertenece a una región escribible de `stack` y el
        // marco inicial ocupa mucho menos que el tamaño mínimo de pila.
        self.stack_pointer = unsafe { x86_64::initial_frame(stack.top(), this, entry) };
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("stack_pointer", &(self.stack_pointer as *const u8))
            .finish_non_exhaustive()
    }
}

/// Captura el hilo actual en `from` y transfiere el control a `to`.
///
/// Regresa únicamente cuando algún [`switch`] o [`jump`] posterior retoma
/// `from`; en ese momento reinstala la máscara de señales guardada.
/// `from` y `to` pueden ser el mismo contexto: en ese caso regresa enseguida.
///
/// # Safety
///
/// Ambos punteros deben ser válidos y `to` debe haber sido capturado o
/// preparado con [`Context::prepare`]. La pila de `to` debe seguir mapeada.
pub unsafe fn switch(from: *mut Context, to: *const Context) {
    // SAFETY: el llamador garantiza que los punteros son válidos.
    unsafe {
        debug_assert!(
            ptr::eq(from, to) || (*to).is_captured(),
            "contexto destino sin capturar"
        );
        let mask = &raw mut (*from).signal_mask;
        libc::pthread_sigmask(libc::SIG_SETMASK, ptr::null(), mask);
        let save = &raw mut (*from).stack_pointer;
        x86_64::switch_stack(save, &raw const (*to).stack_pointer);
        // Retomados: `from` vuelve a ser nuestro propio contexto.
        libc::pthread_sigmask(libc::SIG_SETMASK, mask, ptr::null_mut());
    }
}

/// Transfiere el control a `to` sin capturar al llamador.
///
/// Se usa cuando la pila actual está muriendo y nadie la va a retomar.
///
/// # Safety
///
/// Igual que [`switch`]. Todo lo que viva en la pila del llamador queda
/// abandonado sin ejecutar sus destructores.
pub unsafe fn jump(to: *const Context) -> ! {
    // SAFETY: el llamador garantiza que `to` es retomable.
    unsafe {
        debug_assert!((*to).is_captured(), "contexto destino sin capturar");
        x86_64::jump_stack(&raw const (*to).stack_pointer)
    }
}

/// Primer código Rust de un hilo nuevo; lo llama el trampolín.
extern "C" fn context_start(context: *const Context, entry: extern "C" fn() -> !) -> ! {
    // SAFETY: el trampolín recibe la dirección que dejó `Context::prepare`.
    unsafe {
        let mask = &raw const (*context).signal_mask;
        libc::pthread_sigmask(libc::SIG_SETMASK, mask, ptr::null_mut());
    }
    entry()
}

pub(crate) fn empty_sigset() -> libc::sigset_t {
    let mut set = MaybeUninit::<libc::sigset_t>::zeroed();
    // SAFETY: sigemptyset inicializa el conjunto completo.
    unsafe {
        libc::sigemptyset(set.as_mut_ptr());
        set.assume_init()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn never_runs() -> ! {
        unreachable!("este hilo de prueba no se despacha")
    }

    #[test]
    fn empty_context_is_not_captured() {
        assert!(!Context::empty().is_captured());
    }

    #[test]
    fn prepared_context_points_inside_its_stack() {
        let stack = Stack::new(64 * 1024).unwrap();
        let mut context = Box::new(Context::empty());
        unsafe { context.prepare(&stack, never_runs) };

        assert!(context.is_captured());
        assert!(stack.contains(context.stack_pointer));
        // El marco inicial queda pegado al tope de la pila.
        assert!(stack.top() as usize - context.stack_pointer <= 128);
    }
}
