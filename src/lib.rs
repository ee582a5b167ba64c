//! Hilos de usuario (green threads) para un solo hilo del sistema operativo.
//!
//! Planificación round-robin con expropiación: cada cuanto de tiempo virtual
//! de CPU llega un `SIGVTALRM` y el hilo que corre pasa al final de la cola.
//!
//! - [`context`]: pilas propias y cambio de contexto.
//! - [`preemption`]: temporizador virtual, manejador y secciones críticas.
//! - [`scheduler`]: la máquina de estados, sin estado global.
//! - [`uthreads`]: la API pública (`init`, `spawn`, `terminate`, ...) y la
//!   fachada `uthread_*` con códigos de retorno enteros.
//!
//! ```rust,no_run
//! use std::sync::atomic::{AtomicU64, Ordering};
//!
//! static WORK: AtomicU64 = AtomicU64::new(0);
//!
//! uthreads::init(10_000).unwrap();
//! uthreads::spawn(|| loop {
//!     WORK.fetch_add(1, Ordering::Relaxed);
//! })
//! .unwrap();
//!
//! while uthreads::total_quanta() < 10 {}
//! uthreads::terminate(uthreads::MAIN_TID).unwrap();
//! ```

#[cfg(not(all(target_arch = "x86_64", target_os = "linux")))]
compile_error!("uthreads solo soporta x86_64 Linux");

pub mod context;
pub mod preemption;
pub mod scheduler;
pub mod uthreads;

pub use uthreads::*;
