use std::collections::VecDeque;

use crate::uthreads::Tid;

/// Round Robin: cola FIFO de hilos READY.
///
/// Un tid aparece a lo sumo una vez, y está en la cola si y solo si su estado
/// es exactamente `Ready`. La capacidad se reserva de entrada, así que encolar
/// desde el manejador del temporizador nunca reserva memoria.
#[derive(Debug, Default)]
pub struct ReadyQueue {
    queue: VecDeque<Tid>,
}

impl ReadyQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
        }
    }

    /// Encola al final.
    pub fn push(&mut self, tid: Tid) {
        debug_assert!(!self.contains(tid), "tid {tid} ya encolado");
        self.queue.push_back(tid);
    }

    /// Saca el primero de la cola: el que lleva más tiempo esperando.
    pub fn pick(&mut self) -> Option<Tid> {
        self.queue.pop_front()
    }

    /// Quita a `tid` si estaba encolado.
    pub fn remove(&mut self, tid: Tid) -> bool {
        match self.queue.iter().position(|&queued| queued == tid) {
            Some(index) => {
                self.queue.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, tid: Tid) -> bool {
        self.queue.contains(&tid)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Recorre la cola en orden de despacho.
    pub fn iter(&self) -> impl Iterator<Item = Tid> + '_ {
        self.queue.iter().copied()
    }
}
