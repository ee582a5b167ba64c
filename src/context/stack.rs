//! Pilas de hilos: regiones `mmap` de tamaño fijo con página de guarda.

use std::io;
use std::ptr::{self, NonNull};

/// Pila exclusiva de un hilo.
///
/// La región se reserva con `mmap` y la página más baja queda `PROT_NONE`,
/// así que un desborde termina en `SIGSEGV` y no pisa memoria ajena.
/// Liberarla es un `munmap`, que no toma el lock del allocator y por eso se
/// puede hacer desde el manejador del temporizador.
#[derive(Debug)]
pub struct Stack {
    base: NonNull<u8>,
    len: usize,
    guard: usize,
}

// SAFETY: la región es exclusiva de este `Stack`; moverlo entre hilos del SO
// solo mueve el derecho a liberarla.
unsafe impl Send for Stack {}

impl Stack {
    /// Reserva una pila con al menos `size` bytes utilizables.
    pub fn new(size: usize) -> io::Result<Self> {
        let page = page_size();
        let len = mapping_len(size, page).ok_or_else(|| {
            io::Error::new(io::ErrorKind::OutOfMemory, "pila demasiado grande")
        })?;

        // SAFETY: mapeo anónimo nuevo, sin alias.
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_STACK,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: `base` es el inicio del mapeo recién creado.
        if unsafe { libc::mprotect(base, page, libc::PROT_NONE) } != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::munmap(base, len) };
            return Err(err);
        }

        let base = NonNull::new(base.cast::<u8>())
            .ok_or_else(|| io::Error::other("mmap devolvió NULL"))?;
        Ok(Self { base, len, guard: page })
    }

    /// Dirección siguiente al último byte utilizable (las pilas crecen hacia abajo).
    pub fn top(&self) -> *mut u8 {
        // SAFETY: `len` es el tamaño exacto del mapeo.
        unsafe { self.base.as_ptr().add(self.len) }
    }

    /// Primer byte utilizable, justo encima de la página de guarda.
    pub fn bottom(&self) -> *mut u8 {
        // SAFETY: la guarda es parte del mapeo.
        unsafe { self.base.as_ptr().add(self.guard) }
    }

    /// Bytes utilizables.
    #[cfg(test)]
    pub(crate) fn size(&self) -> usize {
        self.len - self.guard
    }

    /// Indica si `addr` cae en la parte utilizable de la pila.
    pub fn contains(&self, addr: usize) -> bool {
        let usable = self.bottom() as usize..self.top() as usize;
        usable.contains(&addr)
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        // SAFETY: `base`/`len` describen el mapeo creado en `new`.
        unsafe { libc::munmap(self.base.as_ptr().cast(), self.len) };
    }
}

/// Largo total del mapeo para `size` bytes utilizables: páginas completas
/// más la guarda. `None` si no entra en `usize`.
pub(crate) fn mapping_len(size: usize, page: usize) -> Option<usize> {
    size.div_ceil(page)
        .max(1)
        .checked_mul(page)?
        .checked_add(page)
}

pub(crate) fn page_size() -> usize {
    // SAFETY: sysconf no tiene precondiciones.
    match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        n if n > 0 => n as usize,
        _ => 4096,
    }
}
