use std::time::Duration;

use crate::context::stack::{mapping_len, page_size};

use super::error::{Result, ThreadError};

/// Cantidad de slots de la tabla de hilos, incluido main.
pub const MAX_THREAD_NUM: usize = 100;

/// Tamaño por defecto de la pila de cada hilo.
pub const STACK_SIZE: usize = 64 * 1024;

/// Pila más chica que aceptamos.
pub const MIN_STACK_SIZE: usize = 16 * 1024;

/// Parámetros de la biblioteca, fijos desde `init`.
///
/// ```rust
/// use uthreads::Config;
///
/// let config = Config::new(10_000).with_max_threads(8).with_stack_size(128 * 1024);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Largo del cuanto en microsegundos.
    pub quantum_usecs: u64,
    /// Bytes utilizables de cada pila (se redondea a páginas).
    pub stack_size: usize,
    /// Slots de la tabla, incluido el 0 de main.
    pub max_threads: usize,
}

impl Config {
    pub fn new(quantum_usecs: u64) -> Self {
        Self {
            quantum_usecs,
            stack_size: STACK_SIZE,
            max_threads: MAX_THREAD_NUM,
        }
    }

    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    pub fn quantum(&self) -> Duration {
        Duration::from_micros(self.quantum_usecs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.quantum_usecs == 0 {
            return Err(ThreadError::InvalidQuantum);
        }
        if self.max_threads == 0 {
            return Err(ThreadError::InvalidConfig("max_threads must be at least 1"));
        }
        if self.stack_size < MIN_STACK_SIZE {
            return Err(ThreadError::InvalidConfig("stack_size is below the 16 KiB minimum"));
        }
        if mapping_len(self.stack_size, page_size()).is_none() {
            return Err(ThreadError::InvalidConfig("stack_size overflows the address space"));
        }
        Ok(())
    }
}
