//! # Ejecución de la Herramienta Externa
//! src/jobs/runner.rs
//!
//! Lleva un job desde `accepted` hasta un estado terminal invocando la
//! herramienta de descubrimiento como proceso hijo.
//!
//! Corre desacoplado del request original, así que ningún error sale de
//! aquí: todo termina en el log y, siempre que se pueda, en un registro
//! `failure` consultable.

use crate::error::JobError;
use crate::jobs::queue::RunRequest;
use crate::jobs::storage::JobStore;
use crate::jobs::types::JobStatus;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[cfg(unix)]
use nix::sys::signal::{killpg, Signal};
#[cfg(unix)]
use nix::unistd::Pid;
#[cfg(unix)]
use std::os::unix::process::CommandExt;

/// Máximo de stdout/stderr que se conserva por stream (1 MiB)
const MAX_CAPTURED_OUTPUT: u64 = 1024 * 1024;

/// Intervalo de sondeo mientras se espera con timeout
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Cómo invocar la herramienta externa
#[derive(Debug, Clone)]
pub struct ExternalTool {
    /// Programa a ejecutar (ej: `simod`, `poetry`)
    pub program: String,

    /// Argumentos que van antes de los del job (ej: `run simod`)
    pub leading_args: Vec<String>,

    pub working_dir: Option<PathBuf>,

    /// `None` = sin límite
    pub timeout: Option<Duration>,
}

impl ExternalTool {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            working_dir: None,
            timeout: None,
        }
    }

    /// Construye la línea de comando para una ejecución
    ///
    /// Con configuración: `--configuration <cfg> --output <dir>`.
    /// Sin ella: `--one-shot --event-log <log> --output <dir>`.
    pub fn command(&self, request: &RunRequest, output_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args);

        match &request.configuration {
            Some(configuration) => {
                cmd.arg("--configuration").arg(configuration);
            }
            None => {
                cmd.arg("--one-shot").arg("--event-log").arg(&request.event_log);
            }
        }
        cmd.arg("--output").arg(output_dir);

        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Grupo propio: un timeout mata también a los procesos que lance
        // la herramienta (wrappers como `poetry run` o `bash`)
        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }

    /// Ejecuta la herramienta y espera a que termine
    pub fn invoke(&self, request: &RunRequest, output_dir: &Path) -> Result<ToolOutcome, JobError> {
        let mut cmd = self.command(request, output_dir);
        info!(command = ?cmd, "Running external tool");

        let mut child = cmd.spawn()?;

        // Leer los pipes en threads aparte: si el hijo llena un pipe
        // mientras esperamos, se bloquearía para siempre.
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_reader = thread::spawn(move || read_stream(stdout));
        let stderr_reader = thread::spawn(move || read_stream(stderr));

        let status = match self.timeout {
            Some(limit) => wait_with_timeout(&mut child, limit)?,
            None => Some(child.wait()?),
        };

        // Con el grupo muerto los pipes se cierran y los lectores terminan
        let stdout = stdout_reader.join().unwrap_or_default();
        let stderr = stderr_reader.join().unwrap_or_default();

        let Some(status) = status else {
            warn!(stderr = %stderr, "External tool killed after timeout");
            return Err(JobError::ToolTimeout(self.timeout.unwrap_or_default()));
        };

        Ok(ToolOutcome {
            exit_code: status.code(),
            stdout,
            stderr,
        })
    }
}

/// Resultado observable de una ejecución
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    /// `None` si el proceso terminó por señal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Espera al hijo hasta `limit`; si se excede lo mata y retorna `None`
fn wait_with_timeout(child: &mut Child, limit: Duration) -> io::Result<Option<ExitStatus>> {
    let start = Instant::now();

    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if start.elapsed() >= limit {
            kill_process_group(child)?;
            child.wait()?;
            return Ok(None);
        }
        thread::sleep(WAIT_POLL_INTERVAL);
    }
}

/// Mata al hijo y a todo su grupo de procesos
#[cfg(unix)]
fn kill_process_group(child: &mut Child) -> io::Result<()> {
    // El hijo es líder de su grupo, así que pgid == pid
    let pgid = Pid::from_raw(child.id() as i32);
    match killpg(pgid, Signal::SIGKILL) {
        Ok(()) => Ok(()),
        // El grupo ya no existe: solo queda recoger al hijo
        Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(errno) => Err(io::Error::from(errno)),
    }
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) -> io::Result<()> {
    child.kill()
}

/// Lee un stream completo, conservando como máximo `MAX_CAPTURED_OUTPUT` bytes
fn read_stream<R: Read>(handle: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut handle) = handle {
        let _ = (&mut handle).take(MAX_CAPTURED_OUTPUT).read_to_end(&mut buf);
        // Seguir drenando para que el hijo no se bloquee escribiendo
        let _ = io::copy(&mut handle, &mut io::sink());
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Garantiza una escritura terminal en cualquier salida del run
///
/// Mientras esté armado, su `Drop` marca el job como `failure` (también
/// durante un panic). Se desarma cuando el run persistió su estado final.
struct TerminalGuard<'a> {
    store: &'a JobStore,
    job_id: &'a str,
    armed: bool,
}

impl<'a> TerminalGuard<'a> {
    fn new(store: &'a JobStore, job_id: &'a str) -> Self {
        Self {
            store,
            job_id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TerminalGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            mark_failed(self.store, self.job_id);
        }
    }
}

/// Recarga el job y lo marca `failure`; cualquier error solo se registra
fn mark_failed(store: &JobStore, job_id: &str) {
    let result = store.load(job_id).and_then(|mut job| {
        if job.is_terminal() {
            return Ok(job.status);
        }
        job.mark_failure()?;
        store.save(&job)?;
        Ok(job.status)
    });

    match result {
        Ok(status) => warn!(job_id, status = %status, "Job left in terminal state after internal error"),
        Err(e) => error!(job_id, error = %e, "Error saving failure status"),
    }
}

/// Ejecuta jobs de descubrimiento de principio a fin
#[derive(Debug, Clone)]
pub struct JobRunner {
    store: JobStore,
    tool: ExternalTool,
}

impl JobRunner {
    pub fn new(store: JobStore, tool: ExternalTool) -> Self {
        Self { store, tool }
    }

    /// Corre un job hasta su estado terminal
    ///
    /// Nunca falla hacia el caller; retorna el estado observado al final
    /// (`Unknown` si ni siquiera se pudo leer).
    pub fn run(&self, request: &RunRequest) -> JobStatus {
        let span = tracing::info_span!("discovery", job_id = %request.job_id);
        let _entered = span.enter();

        let mut guard = TerminalGuard::new(&self.store, &request.job_id);

        match self.try_run(request) {
            Ok(status) => {
                guard.disarm();
                info!(status = %status, "Discovery finished");
            }
            Err(e) => {
                error!(error = %e, "Error running discovery");
                // El guard marca failure al salir del scope
            }
        }
        drop(guard);

        self.store
            .load(&request.job_id)
            .map(|job| job.status)
            .unwrap_or(JobStatus::Unknown)
    }

    fn try_run(&self, request: &RunRequest) -> Result<JobStatus, JobError> {
        let mut job = self.store.load(&request.job_id)?;
        job.mark_running()?;
        self.store.save(&job)?;

        let output_dir = self.store.output_dir(&request.job_id);
        std::fs::create_dir_all(&output_dir)?;

        let outcome = self.tool.invoke(request, &output_dir)?;

        debug!(stdout = %outcome.stdout, "External tool stdout");
        if !outcome.stderr.is_empty() {
            warn!(stderr = %outcome.stderr, "External tool stderr");
        }

        // Recargar para no pisar escrituras concurrentes
        let mut job = self.store.load(&request.job_id)?;
        if outcome.success() {
            job.mark_success(output_dir)?;
        } else {
            error!(exit_code = ?outcome.exit_code, "External tool failed");
            job.mark_failure()?;
        }
        self.store.save(&job)?;

        Ok(job.status)
    }
}
