//! # Servicio Central de Jobs
//! src/jobs/service.rs
//!
//! Coordina el ciclo de vida de los jobs de descubrimiento: valida y
//! guarda submissions, encola la ejecución para los workers y responde
//! consultas de estado y artefactos leyendo el estado persistido.

use crate::config::Config;
use crate::error::JobError;
use crate::jobs::artifacts::{Artifact, ArtifactLocator, ARCHIVE_TOKEN};
use crate::jobs::queue::{JobQueue, RunRequest};
use crate::jobs::runner::{ExternalTool, JobRunner};
use crate::jobs::storage::JobStore;
use crate::jobs::types::JobStatus;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Un archivo subido por el cliente
#[derive(Debug, Clone, Default)]
pub struct Upload {
    pub data: Vec<u8>,
    pub content_type: Option<String>,
    pub filename: Option<String>,
}

/// Todo lo que trae un `POST /discoveries`
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub event_log: Upload,
    pub configuration: Option<Upload>,

    /// Se acepta pero todavía no se usa
    pub callback_url: Option<String>,
}

/// Respuesta inmediata a una submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub request_id: String,
    pub status: JobStatus,
}

/// Estado de un job tal como lo ve un cliente
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub request_id: String,
    pub status: JobStatus,
    pub archive_url: Option<String>,
}

/// Extensión del event log según content type y nombre de archivo
///
/// CSV si el content type lo dice o el nombre termina en `.csv`; XES si
/// el content type es de la familia XML o el nombre termina en `.xes`;
/// XML si el nombre termina en `.xml`; CSV por defecto.
pub fn event_log_extension(content_type: Option<&str>, filename: Option<&str>) -> &'static str {
    let content_type = content_type.unwrap_or_default().to_ascii_lowercase();
    let filename = filename.unwrap_or_default();

    if content_type.contains("csv") || filename.ends_with(".csv") {
        ".csv"
    } else if content_type.contains("xml") || filename.ends_with(".xes") {
        ".xes"
    } else if filename.ends_with(".xml") {
        ".xml"
    } else {
        ".csv"
    }
}

/// Extensión de la configuración: YAML si el content type lo menciona
pub fn configuration_extension(content_type: Option<&str>) -> &'static str {
    let content_type = content_type.unwrap_or_default().to_ascii_lowercase();
    if content_type.contains("yaml") {
        ".yaml"
    } else {
        ".json"
    }
}

/// URL relativa para descargar el archivo completo de resultados
pub fn archive_url(request_id: &str) -> String {
    format!("/discoveries/{}/{}", request_id, ARCHIVE_TOKEN)
}

/// Solo ids con forma de UUID llegan al sistema de archivos
fn is_valid_id(id: &str) -> bool {
    Uuid::parse_str(id).is_ok()
}

/// Servicio central de jobs
#[derive(Debug, Clone)]
pub struct JobService {
    store: JobStore,
    runner: JobRunner,
    locator: ArtifactLocator,
    queue: JobQueue,
}

impl JobService {
    /// Crea el servicio sin iniciar workers
    pub fn new(store: JobStore, runner: JobRunner, queue_capacity: usize) -> Self {
        Self {
            store,
            runner,
            locator: ArtifactLocator::new(),
            queue: JobQueue::new(queue_capacity),
        }
    }

    /// Construye el servicio completo desde la configuración del CLI
    ///
    /// Abre el storage, recupera jobs interrumpidos y arranca los workers.
    pub fn from_config(config: &Config) -> Result<Self, JobError> {
        let store = JobStore::open(&config.storage_path)?;

        let mut tool = ExternalTool::new(config.tool_program.clone());
        tool.leading_args = config.tool_args.clone();
        tool.working_dir = config.tool_workdir.clone();
        tool.timeout = config.tool_timeout();

        let runner = JobRunner::new(store.clone(), tool);
        let service = Self::new(store, runner, config.queue_capacity);

        let recovered = service.recover_interrupted()?;
        if recovered > 0 {
            warn!(recovered, "Marked interrupted jobs as failed");
        }

        service.spawn_workers(config.workers);
        Ok(service)
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Inicia `count` workers que consumen la cola
    pub fn spawn_workers(&self, count: usize) -> Vec<JoinHandle<()>> {
        (0..count)
            .map(|i| {
                let queue = self.queue.clone();
                let runner = self.runner.clone();
                let name = format!("discovery-worker-{}", i);

                thread::spawn(move || Self::worker_loop(name, queue, runner))
            })
            .collect()
    }

    /// Loop principal del worker
    fn worker_loop(name: String, queue: JobQueue, runner: JobRunner) {
        debug!(worker = %name, "Worker started");

        while let Some(request) = queue.dequeue() {
            debug!(worker = %name, job_id = %request.job_id, "Worker picked up job");

            // Un panic en un run no debe matar al worker; el guard del
            // runner ya dejó el job en failure.
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| runner.run(&request)));
            if outcome.is_err() {
                error!(worker = %name, job_id = %request.job_id, "Discovery run panicked");
            }
        }

        debug!(worker = %name, "Worker stopped");
    }

    /// Deja de aceptar trabajo; los workers salen al vaciar la cola
    pub fn shutdown(&self) {
        self.queue.close();
    }

    /// Marca `failure` todo job que quedó `accepted`/`running` de un
    /// proceso anterior
    pub fn recover_interrupted(&self) -> Result<usize, JobError> {
        let mut recovered = 0;

        for id in self.store.list_ids()? {
            let mut job = match self.store.load(&id) {
                Ok(job) => job,
                Err(e) => {
                    warn!(job_id = %id, error = %e, "Skipping unreadable job record");
                    continue;
                }
            };
            if job.is_terminal() {
                continue;
            }

            let marked = job.mark_failure().and_then(|()| self.store.save(&job));
            if let Err(e) = marked {
                error!(job_id = %id, error = %e, "Error marking interrupted job as failure");
                continue;
            }
            recovered += 1;
        }

        Ok(recovered)
    }

    /// Crea un job nuevo y encola su ejecución
    ///
    /// Retorna apenas el job queda `accepted`; nunca espera a la
    /// herramienta externa.
    pub fn submit(&self, submission: Submission) -> Result<SubmitReceipt, JobError> {
        if submission.event_log.data.is_empty() {
            return Err(JobError::InvalidSubmission(
                "event_log is required and must not be empty".to_string(),
            ));
        }
        if self.queue.is_full() {
            return Err(JobError::QueueFull(self.queue.max_capacity()));
        }

        let request_id = Uuid::new_v4().to_string();
        self.store.create(&request_id, JobStatus::Accepted)?;

        self.admit(&request_id, &submission)
    }

    /// Completa la submission de un job ya creado; si algo falla el job
    /// queda `failure` en vez de `accepted` para siempre
    fn admit(&self, request_id: &str, submission: &Submission) -> Result<SubmitReceipt, JobError> {
        self.start(request_id, submission).inspect_err(|_| self.abandon(request_id))
    }

    /// Guarda los inputs de un job recién creado y lo encola
    fn start(&self, request_id: &str, submission: &Submission) -> Result<SubmitReceipt, JobError> {
        let event_log_name = format!(
            "event_log{}",
            event_log_extension(
                submission.event_log.content_type.as_deref(),
                submission.event_log.filename.as_deref(),
            )
        );
        let event_log = self.store.write_input(request_id, &event_log_name, &submission.event_log.data)?;

        let configuration = match &submission.configuration {
            Some(upload) => {
                let name = format!(
                    "configuration{}",
                    configuration_extension(upload.content_type.as_deref())
                );
                Some(self.store.write_input(request_id, &name, &upload.data)?)
            }
            None => None,
        };

        if let Some(callback_url) = &submission.callback_url {
            debug!(job_id = %request_id, callback_url = %callback_url, "Callback URL received (unused)");
        }

        self.queue.enqueue(RunRequest {
            job_id: request_id.to_string(),
            event_log,
            configuration,
        })?;

        info!(job_id = %request_id, "Discovery request accepted");

        Ok(SubmitReceipt {
            request_id: request_id.to_string(),
            status: JobStatus::Accepted,
        })
    }

    /// Marca `failure` un job que no llegó a encolarse
    fn abandon(&self, request_id: &str) {
        let result = self.store.load(request_id).and_then(|mut job| {
            job.mark_failure()?;
            self.store.save(&job)
        });
        match result {
            Ok(()) => warn!(job_id = %request_id, "Submission abandoned, job marked as failure"),
            Err(e) => error!(job_id = %request_id, error = %e, "Error marking abandoned job as failure"),
        }
    }

    /// Estado de un job; `Unknown` si no existe
    ///
    /// Un registro que existe pero no se puede leer es un error, no un
    /// job desconocido.
    pub fn get_status(&self, id: &str) -> Result<StatusReport, JobError> {
        let unknown = || StatusReport {
            request_id: id.to_string(),
            status: JobStatus::Unknown,
            archive_url: None,
        };

        if !is_valid_id(id) {
            return Ok(unknown());
        }

        let job = match self.store.load(id) {
            Ok(job) => job,
            Err(JobError::NotFound(_)) => return Ok(unknown()),
            Err(e) => {
                error!(job_id = %id, error = %e, "Error loading job record");
                return Err(e);
            }
        };

        let archive_url = match job.status {
            JobStatus::Success => self.locator.result_dir(&job).map(|_| archive_url(id)),
            _ => None,
        };

        Ok(StatusReport {
            request_id: id.to_string(),
            status: job.status,
            archive_url,
        })
    }

    /// Contenido de un artefacto (o del archivo completo) de un job
    pub fn get_artifact(&self, id: &str, name: &str) -> Result<Artifact, JobError> {
        if !is_valid_id(id) {
            return Err(JobError::not_found("Request not found"));
        }

        let job = self.store.load(id).map_err(|e| match e {
            JobError::NotFound(_) => JobError::not_found("Request not found"),
            other => other,
        })?;

        self.locator.resolve_file(&job, name)
    }
}
