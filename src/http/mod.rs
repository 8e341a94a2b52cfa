//! # Módulo HTTP
//!
//! Implementa lo necesario de HTTP/1.x desde cero, sin librerías de alto
//! nivel:
//!
//! - Parsing de requests con body binario
//! - Construcción de responses (JSON y descargas)
//! - Status codes
//! - Parsing de `multipart/form-data`
//!
//! Cada conexión atiende un único request y luego se cierra
//! (`Connection: close`), así que no hay keep-alive ni chunked encoding.

pub mod multipart; // multipart/form-data
pub mod request;   // Parsing de HTTP requests
pub mod response;  // Construcción de HTTP responses
pub mod status;    // Códigos de estado HTTP

pub use request::{Method, Request};
pub use response::Response;
pub use status::StatusCode;
