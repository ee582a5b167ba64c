//! Subsistema de expropiación.
//!
//! Un temporizador virtual ([`VirtualTimer`]) dispara `SIGVTALRM` una vez por
//! cuanto. Toda sección de código que toca el estado del planificador corre
//! con esa señal enmascarada ([`CriticalSection`]), de modo que el manejador
//! nunca se intercala con una actualización a medias.

use std::io;
use std::mem::MaybeUninit;
use std::process;
use std::ptr;

use crate::context::empty_sigset;

pub mod timer;

pub use timer::VirtualTimer;

/// Señal que entrega el temporizador de cuantos.
pub const PREEMPT_SIGNAL: libc::c_int = libc::SIGVTALRM;

/// Sección crítica: mientras vive, `SIGVTALRM` está enmascarada.
///
/// Al soltarse restaura la máscara que había al entrar, por lo que se pueden
/// anidar. Si el hilo se suspende con la guarda viva, al retomarse la guarda
/// sigue en su pila y desenmascara al salir como siempre.
#[must_use = "soltar la guarda desenmascara la señal de inmediato"]
pub struct CriticalSection {
    previous: libc::sigset_t,
}

impl CriticalSection {
    /// Enmascara `SIGVTALRM`.
    pub fn enter() -> Self {
        let set = preempt_set();
        let mut previous = empty_sigset();
        // SAFETY: ambos conjuntos están inicializados.
        unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &set, &mut previous) };
        Self { previous }
    }
}

impl Drop for CriticalSection {
    fn drop(&mut self) {
        // SAFETY: `previous` viene de pthread_sigmask.
        unsafe { libc::pthread_sigmask(libc::SIG_SETMASK, &self.previous, ptr::null_mut()) };
    }
}

/// Indica si `SIGVTALRM` está enmascarada en este momento.
pub fn is_masked() -> bool {
    let mut current = empty_sigset();
    // SAFETY: solo consulta la máscara.
    unsafe {
        libc::pthread_sigmask(libc::SIG_SETMASK, ptr::null(), &mut current);
        libc::sigismember(&current, PREEMPT_SIGNAL) == 1
    }
}

/// Instala `handler` para `SIGVTALRM` con `SA_RESTART`.
///
/// Un fallo aquí es fatal: sin reloj de expropiación no hay progreso garantizado.
pub fn install_handler(handler: extern "C" fn(libc::c_int)) {
    // SAFETY: sigaction queda completamente inicializada antes de usarse.
    let result = unsafe {
        let mut action = MaybeUninit::<libc::sigaction>::zeroed().assume_init();
        action.sa_sigaction = handler as libc::sighandler_t;
        action.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(PREEMPT_SIGNAL, &action, ptr::null_mut())
    };
    if result < 0 {
        fatal("sigaction", io::Error::last_os_error());
    }
}

/// Reporta un error del entorno y termina el proceso.
pub fn fatal(what: &str, err: io::Error) -> ! {
    log::error!("{what}: {err}");
    eprintln!("system error: {what}: {err}");
    process::exit(1)
}

fn preempt_set() -> libc::sigset_t {
    let mut set = empty_sigset();
    // SAFETY: `set` está inicializado.
    unsafe { libc::sigaddset(&mut set, PREEMPT_SIGNAL) };
    set
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_sections_nest_and_restore() {
        assert!(!is_masked());
        {
            let _outer = CriticalSection::enter();
            assert!(is_masked());
            {
                let _inner = CriticalSection::enter();
                assert!(is_masked());
            }
            // La interna restauró la máscara de la externa.
            assert!(is_masked());
        }
        assert!(!is_masked());
    }
}
