//! # Errores del Sistema de Jobs
//! src/error.rs
//!
//! Taxonomía única de errores que cruzan las capas del core
//! (storage, runner, artifacts, service).

use crate::jobs::types::JobStatus;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Job desconocido, o artefacto / directorio de salida ausente
    #[error("{0}")]
    NotFound(String),

    /// Colisión de id al crear el namespace de un job
    #[error("Job already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid status transition for job {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: JobStatus,
        to: JobStatus,
    },

    /// Registro que no se puede persistir tal como está
    #[error("Invalid job record: {0}")]
    InvalidRecord(String),

    /// Submission rechazada antes de crear el job
    #[error("Invalid submission: {0}")]
    InvalidSubmission(String),

    #[error("Job queue is full (max capacity: {0})")]
    QueueFull(usize),

    #[error("Job queue is closed")]
    QueueClosed,

    #[error("External tool exceeded timeout of {0:?}")]
    ToolTimeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed job record: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl JobError {
    pub fn not_found(message: impl Into<String>) -> Self {
        JobError::NotFound(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, JobError::NotFound(_))
    }
}
