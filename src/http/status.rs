//! # Códigos de Estado HTTP
//!
//! Los códigos que devuelve el servicio de descubrimiento:
//!
//! - **2xx**: 200 (estado, artefactos) y 202 (submission aceptada)
//! - **4xx**: request inválido, recurso desconocido, método o tamaño
//! - **5xx**: error interno o cola llena

/// Códigos de estado que soporta el servidor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 200 OK
    Ok = 200,

    /// 202 Accepted - El job quedó registrado y se ejecutará después
    Accepted = 202,

    /// 400 Bad Request - Multipart malformado o falta el event log
    BadRequest = 400,

    /// 404 Not Found - Ruta, request o archivo inexistente
    NotFound = 404,

    /// 405 Method Not Allowed - La ruta existe pero no con ese método
    MethodNotAllowed = 405,

    /// 413 Payload Too Large - Body mayor al límite configurado
    PayloadTooLarge = 413,

    /// 500 Internal Server Error
    InternalServerError = 500,

    /// 503 Service Unavailable - Cola de ejecuciones llena
    ServiceUnavailable = 503,
}

impl StatusCode {
    /// Valor numérico del código
    ///
    /// # Ejemplo
    /// ```
    /// use discovery_server::http::StatusCode;
    /// assert_eq!(StatusCode::Accepted.as_u16(), 202);
    /// ```
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }

    /// Reason phrase estándar
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::Accepted => "Accepted",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::NotFound => "Not Found",
            StatusCode::MethodNotAllowed => "Method Not Allowed",
            StatusCode::PayloadTooLarge => "Payload Too Large",
            StatusCode::InternalServerError => "Internal Server Error",
            StatusCode::ServiceUnavailable => "Service Unavailable",
        }
    }
}

impl std::fmt::Display for StatusCode {
    /// Formato: "200 OK"
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.reason_phrase())
    }
}
