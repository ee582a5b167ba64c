//! Cambio de pila para x86_64 (System V).
//!
//! Una pila suspendida tiene, desde el puntero guardado hacia arriba:
//!
//! ```text
//! sp + 0x00  MXCSR (u32) | palabra de control x87 (u16)
//! sp + 0x08  relleno
//! sp + 0x10  r15
//! sp + 0x18  r14
//! sp + 0x20  r13
//! sp + 0x28  r12
//! sp + 0x30  rbx
//! sp + 0x38  rbp
//! sp + 0x40  dirección de retorno
//! ```

use std::arch::naked_asm;

use super::Context;

const DEFAULT_MXCSR: u64 = 0x1F80;
const DEFAULT_FPU_CW: u64 = 0x037F;

/// Guarda el hilo actual en `*save` y continúa en la pila `*load`.
///
/// # Safety
///
/// `*load` debe venir de un `switch_stack` anterior o de [`initial_frame`].
#[unsafe(naked)]
pub(super) unsafe extern "C" fn switch_stack(_save: *mut usize, _load: *const usize) {
    naked_asm!(
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "sub rsp, 16",
        "stmxcsr [rsp]",
        "fnstcw [rsp + 4]",
        "mov [rdi], rsp",
        "mov rsp, [rsi]",
        "ldmxcsr [rsp]",
        "fldcw [rsp + 4]",
        "add rsp, 16",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "ret",
    )
}

/// Continúa en la pila `*load` sin guardar nada.
///
/// # Safety
///
/// Igual que [`switch_stack`].
#[unsafe(naked)]
pub(super) unsafe extern "C" fn jump_stack(_load: *const usize) -> ! {
    naked_asm!(
        "mov rsp, [rdi]",
        "ldmxcsr [rsp]",
        "fldcw [rsp + 4]",
        "add rsp, 16",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "ret",
    )
}

/// Punto de entrada de un hilo nuevo. r12 = contexto, r13 = función.
///
/// Al llegar aquí `rsp` está alineado a 16, así que el `call` deja la pila
/// como la espera el ABI.
#[unsafe(naked)]
unsafe extern "C" fn trampoline() -> ! {
    naked_asm!(
        "mov rdi, r12",
        "mov rsi, r13",
        "call {start}",
        "ud2",
        start = sym super::context_start,
    )
}

/// Escribe el marco inicial en el tope de una pila nueva y devuelve el
/// puntero de pila que `switch_stack` debe cargar.
///
/// # Safety
///
/// `top` debe ser el final (exclusivo) de una región escribible de al menos
/// 96 bytes.
pub(super) unsafe fn initial_frame(
    top: *mut u8,
    context: *const Context,
    entry: extern "C" fn() -> !,
) -> usize {
    let top = (top as usize & !0xF) as *mut usize;
    let frame: [usize; 9] = [
        (DEFAULT_MXCSR | (DEFAULT_FPU_CW << 32)) as usize,
        0,
        0, // r15
        0, // r14
        entry as usize, // r13
        context as usize, // r12
        0, // rbx
        0, // rbp
        trampoline as usize, // ret
    ];
    // SAFETY: el llamador garantiza espacio para el marco bajo `top`.
    unsafe {
        let sp = top.sub(frame.len());
        sp.copy_from_nonoverlapping(frame.as_ptr(), frame.len());
        sp as usize
    }
}
