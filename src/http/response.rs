//! # Construcción de Respuestas HTTP
//!
//! API builder para armar respuestas y convertirlas a bytes.
//!
//! ```
//! use discovery_server::http::{Response, StatusCode};
//!
//! let response = Response::new(StatusCode::Ok)
//!     .with_header("Content-Type", "text/plain")
//!     .with_body("Hello");
//!
//! let bytes = response.to_bytes();
//! assert!(bytes.starts_with(b"HTTP/1.1 200 OK\r\n"));
//! ```

use super::StatusCode;
use serde::Serialize;
use std::collections::BTreeMap;

/// Una respuesta HTTP completa
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,

    /// Ordenados para que la salida sea estable
    headers: BTreeMap<String, String>,

    body: Vec<u8>,
}

#[derive(Serialize)]
struct MessageBody<'a> {
    message: &'a str,
}

impl Response {
    /// Respuesta sin headers ni body
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: Vec::new(),
        }
    }

    /// Agrega un header (si ya existe, se sobrescribe)
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.add_header(name, value);
        self
    }

    pub fn add_header(&mut self, name: &str, value: &str) {
        self.headers.insert(name.to_string(), value.to_string());
    }

    /// Body de texto; calcula `Content-Length`
    pub fn with_body(self, body: &str) -> Self {
        self.with_body_bytes(body.as_bytes().to_vec())
    }

    /// Body binario; calcula `Content-Length`
    pub fn with_body_bytes(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        let length = self.body.len().to_string();
        self.add_header("Content-Length", &length);
        self
    }

    /// Serializa `value` como JSON con el status indicado
    ///
    /// Si la serialización falla se responde 500 con un mensaje fijo.
    pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self::new(status)
                .with_header("Content-Type", "application/json")
                .with_body_bytes(body),
            Err(_) => Self::new(StatusCode::InternalServerError)
                .with_header("Content-Type", "application/json")
                .with_body(r#"{"message":"Internal server error"}"#),
        }
    }

    /// Respuesta de error con formato `{"message": "..."}`
    ///
    /// # Ejemplo
    /// ```
    /// use discovery_server::http::{Response, StatusCode};
    ///
    /// let response = Response::error(StatusCode::NotFound, "File not found: x.csv");
    /// assert_eq!(response.body(), br#"{"message":"File not found: x.csv"}"#);
    /// ```
    pub fn error(status: StatusCode, message: &str) -> Self {
        Self::json(status, &MessageBody { message })
    }

    /// Descarga de archivo con `Content-Disposition: attachment`
    pub fn attachment(file_name: &str, media_type: &str, content: Vec<u8>) -> Self {
        let disposition = format!("attachment; filename=\"{}\"", file_name.replace('"', ""));
        Self::new(StatusCode::Ok)
            .with_header("Content-Type", media_type)
            .with_header("Content-Disposition", &disposition)
            .with_body_bytes(content)
    }

    /// Convierte la respuesta a bytes listos para el socket
    ///
    /// Status line, headers, línea vacía y body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut result = Vec::with_capacity(self.body.len() + 256);

        result.extend_from_slice(format!("HTTP/1.1 {}\r\n", self.status).as_bytes());

        for (name, value) in &self.headers {
            result.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }

        result.extend_from_slice(b"\r\n");
        result.extend_from_slice(&self.body);

        result
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Header por nombre, sin distinguir mayúsculas
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}
