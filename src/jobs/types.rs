//! # Tipos y Estructuras para el Sistema de Jobs
//! src/jobs/types.rs
//!
//! Define el registro persistido de un job de descubrimiento y su
//! máquina de estados:
//!
//! ```text
//! accepted ──> running ──> success
//!    │            └──────> failure
//!    └───────────────────> failure
//! ```

use crate::error::JobError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Estado de un job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Sintético: no existe registro para el id. Nunca se persiste.
    Unknown,

    /// Job creado, esperando un worker
    Accepted,

    /// La herramienta externa se está ejecutando
    Running,

    /// La herramienta terminó con código 0
    Success,

    /// Código distinto de 0 o error interno
    Failure,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Unknown => "unknown",
            JobStatus::Accepted => "accepted",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failure => "failure",
        }
    }

    /// Verifica si el estado es terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failure)
    }

    /// Transiciones permitidas por la máquina de estados
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Accepted, JobStatus::Running)
                | (JobStatus::Accepted, JobStatus::Failure)
                | (JobStatus::Running, JobStatus::Success)
                | (JobStatus::Running, JobStatus::Failure)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registro de un job tal como vive en `request.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// UUID asignado al crear el job; también es su namespace en disco
    pub id: String,

    /// Estado actual
    pub status: JobStatus,

    /// Último cambio de estado (ausente hasta la primera transición)
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,

    /// Directorio de salida; presente si y solo si `status == Success`
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

impl Job {
    /// Crea un registro nuevo, aún sin timestamp
    pub fn new(id: impl Into<String>, status: JobStatus) -> Self {
        Self {
            id: id.into(),
            status,
            timestamp: None,
            output_dir: None,
        }
    }

    /// Marca el job como iniciado
    pub fn mark_running(&mut self) -> Result<(), JobError> {
        self.transition(JobStatus::Running)
    }

    /// Marca el job como completado y registra dónde quedó la salida
    pub fn mark_success(&mut self, output_dir: PathBuf) -> Result<(), JobError> {
        self.transition(JobStatus::Success)?;
        self.output_dir = Some(output_dir);
        Ok(())
    }

    /// Marca el job como fallido
    pub fn mark_failure(&mut self) -> Result<(), JobError> {
        self.transition(JobStatus::Failure)?;
        self.output_dir = None;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), JobError> {
        if !self.status.can_transition_to(next) {
            return Err(JobError::InvalidTransition {
                id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.timestamp = Some(Utc::now());
        Ok(())
    }
}

/// Body de `POST /discoveries` y `GET /discoveries/{id}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryResponse {
    pub request_id: String,
    pub request_status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_url: Option<String>,
}

/// Body de `GET /discoveries/{id}` cuando el id no existe
#[derive(Debug, Clone, Serialize)]
pub struct UnknownDiscoveryResponse {
    pub request_id: String,
    pub request_status: JobStatus,
    pub message: String,
}
