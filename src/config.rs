//! # Configuración del Servidor
//! src/config.rs
//!
//! Configuración del servicio de descubrimiento con soporte para
//! argumentos CLI y variables de entorno.
//!
//! ## Ejemplos de uso
//!
//! ### CLI
//! ```bash
//! ./discovery_server --port 8080 \
//!   --storage-path /var/lib/discovery \
//!   --workers 2 \
//!   --tool-program poetry --tool-arg run --tool-arg simod
//! ```
//!
//! ### Variables de entorno
//! ```bash
//! DISCOVERY_PORT=8080 DISCOVERY_DEBUG=true ./discovery_server
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// 256 MiB
pub const DEFAULT_MAX_BODY_BYTES: usize = 256 * 1024 * 1024;

/// Configuración del servicio
#[derive(Debug, Clone, Parser)]
#[command(name = "discovery_server")]
#[command(about = "Servicio HTTP de descubrimiento de modelos de procesos")]
#[command(version)]
pub struct Config {
    /// Host/IP en el que escucha
    #[arg(long, default_value = "127.0.0.1", env = "DISCOVERY_HOST")]
    pub host: String,

    /// Puerto en el que escucha el servidor
    #[arg(short, long, default_value = "8080", env = "DISCOVERY_PORT")]
    pub port: u16,

    /// Raíz del storage de jobs
    #[arg(long = "storage-path", default_value = "/tmp/discovery", env = "DISCOVERY_STORAGE_PATH")]
    pub storage_path: PathBuf,

    /// Logging detallado (el filtro por defecto pasa a debug)
    #[arg(long, env = "DISCOVERY_DEBUG")]
    pub debug: bool,

    // === Workers y cola ===

    /// Número de workers que ejecutan la herramienta
    #[arg(long, default_value = "4", env = "DISCOVERY_WORKERS")]
    pub workers: usize,

    /// Ejecuciones pendientes antes de responder 503
    #[arg(long = "queue-capacity", default_value = "1000", env = "DISCOVERY_QUEUE_CAPACITY")]
    pub queue_capacity: usize,

    // === Herramienta externa ===

    /// Programa que hace el descubrimiento
    #[arg(long = "tool-program", default_value = "simod", env = "DISCOVERY_TOOL_PROGRAM")]
    pub tool_program: String,

    /// Argumentos que van antes de los del job (repetible)
    #[arg(long = "tool-arg", allow_hyphen_values = true)]
    pub tool_args: Vec<String>,

    /// Directorio de trabajo de la herramienta
    #[arg(long = "tool-workdir", env = "DISCOVERY_TOOL_WORKDIR")]
    pub tool_workdir: Option<PathBuf>,

    /// Tiempo máximo por ejecución en segundos (0 = sin límite)
    #[arg(long = "tool-timeout-secs", default_value = "0", env = "DISCOVERY_TOOL_TIMEOUT_SECS")]
    pub tool_timeout_secs: u64,

    // === HTTP ===

    /// Tamaño máximo del body de un request
    #[arg(long = "max-body-bytes", default_value_t = DEFAULT_MAX_BODY_BYTES, env = "DISCOVERY_MAX_BODY_BYTES")]
    pub max_body_bytes: usize,
}

impl Config {
    /// Dirección completa para bind (host:port)
    ///
    /// # Ejemplo
    /// ```rust
    /// use discovery_server::config::Config;
    ///
    /// let config = Config::default();
    /// assert_eq!(config.address(), "127.0.0.1:8080");
    /// ```
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Timeout de la herramienta, `None` si no hay límite
    pub fn tool_timeout(&self) -> Option<Duration> {
        match self.tool_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Filtro de logging por defecto según `--debug`
    pub fn default_log_filter(&self) -> &'static str {
        if self.debug {
            "discovery_server=debug"
        } else {
            "discovery_server=info"
        }
    }

    /// Valida la configuración
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("Workers must be >= 1".to_string());
        }
        if self.queue_capacity == 0 {
            return Err("Queue capacity must be >= 1".to_string());
        }
        if self.tool_program.trim().is_empty() {
            return Err("Tool program must not be empty".to_string());
        }
        if self.max_body_bytes == 0 {
            return Err("Max body bytes must be > 0".to_string());
        }
        if self.storage_path.as_os_str().is_empty() {
            return Err("Storage path must not be empty".to_string());
        }

        Ok(())
    }

    /// Registra un resumen de la configuración
    pub fn log_summary(&self) {
        info!(
            address = %self.address(),
            storage_path = %self.storage_path.display(),
            workers = self.workers,
            queue_capacity = self.queue_capacity,
            max_body_bytes = self.max_body_bytes,
            "Server configuration"
        );
        info!(
            program = %self.tool_program,
            args = ?self.tool_args,
            workdir = ?self.tool_workdir,
            timeout_secs = self.tool_timeout_secs,
            "External tool"
        );
    }
}

impl Default for Config {
    /// Mismos valores que los defaults del CLI
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            storage_path: PathBuf::from("/tmp/discovery"),
            debug: false,
            workers: 4,
            queue_capacity: 1000,
            tool_program: "simod".to_string(),
            tool_args: Vec::new(),
            tool_workdir: None,
            tool_timeout_secs: 0,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}
