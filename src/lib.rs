//! # Discovery Server
//! src/lib.rs
//!
//! Servicio HTTP que recibe event logs, ejecuta en segundo plano una
//! herramienta externa de descubrimiento de modelos de procesos y expone
//! el estado y los resultados de cada ejecución.
//!
//! ## Arquitectura
//!
//! - `http`: Parsing y construcción de mensajes HTTP, multipart
//! - `server`: Servidor TCP, un thread por conexión
//! - `router`: Enrutamiento por método y path
//! - `jobs`: Storage, cola, workers, runner y artefactos
//! - `config`: CLI y variables de entorno
//! - `error`: Error del dominio de jobs
//!
//! ## Ejemplo de uso
//!
//! ```no_run
//! use discovery_server::config::Config;
//! use discovery_server::server::Server;
//!
//! let config = Config::default();
//! let server = Server::new(config).unwrap();
//! server.run().unwrap();
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod jobs;
pub mod router;
pub mod server;
