//! Temporizador de cuantos sobre `setitimer(ITIMER_VIRTUAL)`.

use std::io;
use std::ptr;
use std::time::Duration;

use super::fatal;

/// Temporizador periódico con retardo inicial igual al período.
///
/// Mide tiempo de CPU del proceso, así que un proceso dormido no consume cuantos.
#[derive(Clone, Copy)]
pub struct VirtualTimer {
    quantum: Duration,
}

impl VirtualTimer {
    pub fn new(quantum_usecs: u64) -> Self {
        Self {
            quantum: Duration::from_micros(quantum_usecs),
        }
    }

    /// (Re)arma el temporizador: el próximo disparo ocurre dentro de un cuanto completo.
    pub fn arm(&self) {
        let period = to_timeval(self.quantum);
        self.set(libc::itimerval {
            it_interval: period,
            it_value: period,
        });
    }

    /// Detiene el temporizador.
    pub fn disarm(&self) {
        let zero = to_timeval(Duration::ZERO);
        self.set(libc::itimerval {
            it_interval: zero,
            it_value: zero,
        });
    }

    fn set(&self, value: libc::itimerval) {
        // SAFETY: `value` es un itimerval válido.
        if unsafe { libc::setitimer(libc::ITIMER_VIRTUAL, &value, ptr::null_mut()) } < 0 {
            fatal("setitimer", io::Error::last_os_error());
        }
    }
}

impl std::fmt::Debug for VirtualTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualTimer")
            .field("quantum", &self.quantum)
            .finish()
    }
}

fn to_timeval(duration: Duration) -> libc::timeval {
    libc::timeval {
        tv_sec: duration.as_secs() as libc::time_t,
        tv_usec: duration.subsec_micros() as libc::suseconds_t,
    }
}
