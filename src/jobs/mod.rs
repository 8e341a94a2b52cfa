//! # Sistema de Jobs de Descubrimiento
//!
//! Ejecuta la herramienta externa de descubrimiento en segundo plano sin
//! bloquear las conexiones HTTP.
//!
//! ```text
//! POST /discoveries ─► JobService::submit ─► JobStore (accepted)
//!                                        └─► JobQueue ─► worker ─► JobRunner ─► herramienta
//! GET /discoveries/{id}[/{file}] ─► JobService ─► JobStore + ArtifactLocator
//! ```
//!
//! ## Endpoints
//!
//! - `POST /discoveries` - Registrar un descubrimiento
//! - `GET /discoveries/{id}` - Consultar estado
//! - `GET /discoveries/{id}/{file_name}` - Descargar un artefacto o `results.tar.gz`

pub mod artifacts;
pub mod handlers;
pub mod queue;
pub mod runner;
pub mod service;
pub mod storage;
pub mod types;

pub use artifacts::{Artifact, ArtifactLocator};
pub use queue::{JobQueue, RunRequest};
pub use runner::{ExternalTool, JobRunner};
pub use service::{JobService, Submission, Upload};
pub use storage::JobStore;
pub use types::{DiscoveryResponse, Job, JobStatus};
