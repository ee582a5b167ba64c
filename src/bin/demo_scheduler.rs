use std::hint;
use std::sync::atomic::{AtomicU64, Ordering};

use uthreads::{Config, ThreadError, ThreadState, Tid, MAIN_TID};

const QUANTUM_USECS: u64 = 5_000;

// Los hilos verdes no imprimen ni reservan memoria: main puede quedar
// expropiado con el lock de stdout o del allocator tomado.
static VUELTAS_RR1: AtomicU64 = AtomicU64::new(0);
static VUELTAS_RR2: AtomicU64 = AtomicU64::new(0);
static DESPERTARES: AtomicU64 = AtomicU64::new(0);

fn hilo_rr1() {
    loop {
        VUELTAS_RR1.fetch_add(1, Ordering::Relaxed);
        hint::spin_loop();
    }
}

fn hilo_rr2() {
    loop {
        VUELTAS_RR2.fetch_add(1, Ordering::Relaxed);
        hint::spin_loop();
    }
}

fn hilo_dormilon() {
    loop {
        if uthreads::sleep(3).is_err() {
            return;
        }
        DESPERTARES.fetch_add(1, Ordering::Relaxed);
    }
}

/// Quema CPU de usuario hasta que pasen `cuantos` cuantos más.
///
/// El temporizador es virtual: solo avanza mientras el proceso corre en modo
/// usuario, así que no alcanza con consultar el contador en un bucle.
fn esperar_cuantos(cuantos: u64) {
    let meta = uthreads::total_quanta() + cuantos;
    while uthreads::total_quanta() < meta {
        for _ in 0..10_000 {
            hint::spin_loop();
        }
    }
}

fn imprimir_tabla() -> Result<(), ThreadError> {
    let filas = uthreads::with_threads(|table| {
        table
            .iter()
            .filter(|t| t.is_live())
            .map(|t| (t.id, t.state, t.run_count, t.wake_at))
            .collect::<Vec<_>>()
    })?;
    for (tid, state, run_count, wake_at) in filas {
        println!("  tid={tid} state={state:?} quanta={run_count} wake_at={wake_at:?}");
    }
    Ok(())
}

fn main() -> Result<(), ThreadError> {
    println!("========================================");
    println!("   DEMO SCHEDULER: ROUND ROBIN + SLEEP");
    println!("========================================\n");

    // 1) Inicializar: main pasa a ser el tid 0
    uthreads::init_with(Config::new(QUANTUM_USECS).with_max_threads(8))?;

    // 2) Crear hilos
    let rr1: Tid = uthreads::spawn(hilo_rr1)?;
    let rr2: Tid = uthreads::spawn(hilo_rr2)?;
    let dormilon: Tid = uthreads::spawn(hilo_dormilon)?;

    println!("Hilos creados (quantum = {QUANTUM_USECS} us):");
    imprimir_tabla()?;

    println!("\n----------------------------------------");
    println!("FASE 1: Round Robin entre main y 3 hilos");
    println!("----------------------------------------");

    esperar_cuantos(12);
    println!("  total de cuantos: {}", uthreads::total_quanta());
    for tid in [MAIN_TID, rr1, rr2, dormilon] {
        println!("  tid={tid} corrió {} cuantos", uthreads::quanta(tid)?);
    }
    let despertares = DESPERTARES.load(Ordering::Relaxed);
    println!("  despertares del dormilón: {despertares}");

    println!("\n----------------------------------------");
    println!("FASE 2: Bloquear rr2");
    println!("----------------------------------------");

    uthreads::block(rr2)?;
    let congelado = VUELTAS_RR2.load(Ordering::Relaxed);
    esperar_cuantos(8);
    println!(
        "  rr2 estado={:?}, vueltas antes={congelado} después={}",
        uthreads::thread_state(rr2)?,
        VUELTAS_RR2.load(Ordering::Relaxed)
    );

    uthreads::resume(rr2)?;
    esperar_cuantos(8);
    println!(
        "  rr2 reanudado: estado={:?}, vueltas={}",
        uthreads::thread_state(rr2)?,
        VUELTAS_RR2.load(Ordering::Relaxed)
    );

    println!("\n----------------------------------------");
    println!("FASE 3: Bloquear al dormilón mientras duerme");
    println!("----------------------------------------");

    while uthreads::thread_state(dormilon)? != ThreadState::Sleeping {
        hint::spin_loop();
    }
    uthreads::block(dormilon)?;
    println!("  dormilón: {:?}", uthreads::thread_state(dormilon)?);
    uthreads::resume(dormilon)?;
    let estado = uthreads::thread_state(dormilon)?;
    println!("  dormilón reanudado: {estado:?}");

    println!("\n----------------------------------------");
    println!("FASE 4: Terminar rr1 y reusar su tid");
    println!("----------------------------------------");

    uthreads::terminate(rr1)?;
    let nuevo = uthreads::spawn(hilo_rr1)?;
    println!("  rr1 terminado, el hilo nuevo recibió tid={nuevo}");
    esperar_cuantos(4);
    imprimir_tabla()?;

    println!("\n========================================");
    println!(
        "Fin: {} cuantos, rr1={} rr2={} despertares={}",
        uthreads::total_quanta(),
        VUELTAS_RR1.load(Ordering::Relaxed),
        VUELTAS_RR2.load(Ordering::Relaxed),
        DESPERTARES.load(Ordering::Relaxed)
    );
    println!("========================================");

    // Terminar main libera todas las pilas y cierra el proceso con código 0.
    uthreads::terminate(MAIN_TID)
}
