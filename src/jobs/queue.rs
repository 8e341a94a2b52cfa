//! # Cola de Ejecuciones Pendientes
//! src/jobs/queue.rs
//!
//! Cola FIFO thread-safe que conecta el handler de submission (productor)
//! con los workers (consumidores). El handler solo encola y responde.

use crate::error::JobError;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// Mensaje que recibe un worker: todo lo necesario para correr un job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub job_id: String,
    pub event_log: PathBuf,
    pub configuration: Option<PathBuf>,
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<RunRequest>,
    closed: bool,
}

/// Cola FIFO con capacidad máxima
#[derive(Debug, Clone)]
pub struct JobQueue {
    state: Arc<Mutex<QueueState>>,

    /// Condvar para notificar cuando hay nuevos jobs (o al cerrar)
    condvar: Arc<Condvar>,

    max_capacity: usize,
}

impl JobQueue {
    pub fn new(max_capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            condvar: Arc::new(Condvar::new()),
            max_capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Encola una ejecución
    ///
    /// Falla si la cola está llena o ya fue cerrada.
    pub fn enqueue(&self, request: RunRequest) -> Result<(), JobError> {
        let mut state = self.lock();

        if state.closed {
            return Err(JobError::QueueClosed);
        }
        if state.items.len() >= self.max_capacity {
            return Err(JobError::QueueFull(self.max_capacity));
        }

        state.items.push_back(request);
        self.condvar.notify_one();

        Ok(())
    }

    /// Desencola la ejecución más antigua
    ///
    /// Bloquea hasta que haya una disponible. Retorna `None` cuando la
    /// cola está cerrada y vacía.
    pub fn dequeue(&self) -> Option<RunRequest> {
        let mut state = self.lock();

        loop {
            if let Some(request) = state.items.pop_front() {
                return Some(request);
            }
            if state.closed {
                return None;
            }
            state = self
                .condvar
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Cierra la cola: no acepta más trabajo y despierta a los workers
    ///
    /// Lo ya encolado se sigue entregando hasta vaciarse.
    pub fn close(&self) {
        self.lock().closed = true;
        self.condvar.notify_all();
    }

    fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.max_capacity
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }
}
