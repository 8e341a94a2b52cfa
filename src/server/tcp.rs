//! # Servidor TCP Concurrente
//! src/server/tcp.rs
//!
//! Servidor TCP que atiende cada conexión en su propio thread. Cada
//! conexión lleva exactamente un request: se lee la cabecera, luego el
//! body según `Content-Length`, se despacha al router y se cierra.

use crate::config::Config;
use crate::error::JobError;
use crate::http::request::{find_header_end, ParseError, HEADER_TERMINATOR};
use crate::http::{Method, Request, Response, StatusCode};
use crate::jobs::{handlers, JobService};
use crate::router::Router;
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

/// Límite para la cabecera (request line + headers)
const MAX_HEADER_BYTES: usize = 64 * 1024;

/// Tiempo máximo esperando datos del cliente
const READ_TIMEOUT: Duration = Duration::from_secs(30);

const CONTINUE_RESPONSE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// Lo que se leyó de una conexión
enum Incoming {
    Request(Request),
    Rejected(Response),
    Closed,
}

/// Servidor HTTP del servicio de descubrimiento
pub struct Server {
    config: Config,
    router: Arc<Router>,
}

impl Server {
    /// Crea el servidor y el servicio de jobs desde la configuración
    pub fn new(config: Config) -> Result<Self, JobError> {
        let service = JobService::from_config(&config)?;
        Ok(Self::with_service(config, service))
    }

    /// Crea el servidor sobre un servicio ya construido
    pub fn with_service(config: Config, service: JobService) -> Self {
        let router = Self::build_router(&service);

        Self {
            config,
            router: Arc::new(router),
        }
    }

    fn build_router(service: &JobService) -> Router {
        let mut router = Router::new();

        let submit = service.clone();
        router.register(Method::POST, "/discoveries", move |req, params| {
            handlers::submit_handler(req, params, &submit)
        });

        let status = service.clone();
        router.register(Method::GET, "/discoveries/{id}", move |req, params| {
            handlers::status_handler(req, params, &status)
        });

        let artifacts = service.clone();
        router.register(Method::GET, "/discoveries/{id}/{file_name}", move |req, params| {
            handlers::artifact_handler(req, params, &artifacts)
        });

        router
    }

    /// Bind en la dirección configurada y atiende conexiones
    ///
    /// Bloquea el thread actual.
    pub fn run(&self) -> io::Result<()> {
        let address = self.config.address();
        let listener = TcpListener::bind(&address)?;
        info!(address = %address, "Server listening");

        self.serve(listener)
    }

    /// Atiende conexiones de un listener ya abierto
    pub fn serve(&self, listener: TcpListener) -> io::Result<()> {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let router = Arc::clone(&self.router);
                    let max_body_bytes = self.config.max_body_bytes;

                    thread::spawn(move || {
                        if let Err(e) = Self::handle_connection(stream, &router, max_body_bytes) {
                            warn!(error = %e, "Connection error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }

        Ok(())
    }

    fn handle_connection(mut stream: TcpStream, router: &Router, max_body_bytes: usize) -> io::Result<()> {
        let start = Instant::now();
        let request_id = Uuid::new_v4().to_string();
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        let span = info_span!("connection", request_id = %request_id, peer = %peer);
        let _enter = span.enter();

        stream.set_read_timeout(Some(READ_TIMEOUT))?;

        let (mut response, route) = match Self::read_request(&mut stream, max_body_bytes)? {
            Incoming::Request(request) => {
                let route = format!("{} {}", request.method(), request.path());
                debug!(route = %route, body_bytes = request.body().len(), "Request received");
                (router.route(&request), route)
            }
            Incoming::Rejected(response) => (response, "-".to_string()),
            Incoming::Closed => {
                debug!("Connection closed without a request");
                return Ok(());
            }
        };

        response.add_header("X-Request-Id", &request_id);
        response.add_header("Connection", "close");

        stream.write_all(&response.to_bytes())?;
        stream.flush()?;

        info!(
            route = %route,
            status = response.status().as_u16(),
            latency_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Request handled"
        );

        Ok(())
    }

    /// Lee cabecera y body de un request
    fn read_request(stream: &mut TcpStream, max_body_bytes: usize) -> io::Result<Incoming> {
        let mut buffer = Vec::with_capacity(8192);
        let mut chunk = [0u8; 8192];

        // 1. Cabecera
        let header_end = loop {
            if let Some(end) = find_header_end(&buffer) {
                break end + HEADER_TERMINATOR.len();
            }
            if buffer.len() > MAX_HEADER_BYTES {
                return Ok(Incoming::Rejected(Response::error(
                    StatusCode::BadRequest,
                    "Request header too large",
                )));
            }

            let read = stream.read(&mut chunk)?;
            if read == 0 {
                if buffer.is_empty() {
                    return Ok(Incoming::Closed);
                }
                // EOF sin línea vacía: se parsea lo que haya
                break buffer.len();
            }
            buffer.extend_from_slice(&chunk[..read]);
        };

        let head = match Request::parse(&buffer[..header_end]) {
            Ok(head) => head,
            Err(e) => return Ok(Incoming::Rejected(Self::parse_error_response(&e))),
        };

        // 2. Body
        let content_length = match head.header("content-length") {
            None => 0,
            Some(_) => match head.content_length() {
                Some(length) => length,
                None => {
                    return Ok(Incoming::Rejected(Response::error(
                        StatusCode::BadRequest,
                        "Invalid Content-Length",
                    )));
                }
            },
        };

        if content_length > max_body_bytes {
            warn!(content_length, max_body_bytes, "Request body too large");
            return Ok(Incoming::Rejected(Response::error(
                StatusCode::PayloadTooLarge,
                &format!("Request body exceeds {} bytes", max_body_bytes),
            )));
        }

        let expects_continue = head
            .header("expect")
            .is_some_and(|value| value.eq_ignore_ascii_case("100-continue"));
        let total = header_end + content_length;

        if expects_continue && buffer.len() < total {
            stream.write_all(CONTINUE_RESPONSE)?;
            stream.flush()?;
        }

        while buffer.len() < total {
            let read = stream.read(&mut chunk)?;
            if read == 0 {
                return Ok(Incoming::Rejected(Response::error(
                    StatusCode::BadRequest,
                    "Incomplete request body",
                )));
            }
            buffer.extend_from_slice(&chunk[..read]);
        }
        buffer.truncate(total);

        match Request::parse(&buffer) {
            Ok(request) => Ok(Incoming::Request(request)),
            Err(e) => Ok(Incoming::Rejected(Self::parse_error_response(&e))),
        }
    }

    fn parse_error_response(error: &ParseError) -> Response {
        debug!(error = %error, "Unparsable request");
        match error {
            ParseError::UnsupportedMethod(_) => Response::error(StatusCode::MethodNotAllowed, &error.to_string()),
            _ => Response::error(StatusCode::BadRequest, &format!("Invalid request: {}", error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::runner::{ExternalTool, JobRunner};
    use crate::jobs::storage::JobStore;
    use std::net::Shutdown;

    fn test_server(dir: &std::path::Path, max_body_bytes: usize) -> Server {
        let store = JobStore::open(dir).unwrap();
        let runner = JobRunner::new(store.clone(), ExternalTool::new("true"));
        let service = JobService::new(store, runner, 10);

        let config = Config {
            max_body_bytes,
            ..Config::default()
        };
        Server::with_service(config, service)
    }

    /// Atiende una conexión con `raw` y retorna la respuesta completa
    fn exchange(server: &Server, raw: &[u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let router = Arc::clone(&server.router);
        let max_body_bytes = server.config.max_body_bytes;

        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            Server::handle_connection(stream, &router, max_body_bytes).unwrap();
        });

        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(raw).unwrap();
        client.shutdown(Shutdown::Write).unwrap();

        let mut buf = Vec::new();
        client.read_to_end(&mut buf).unwrap();
        handle.join().unwrap();

        String::from_utf8_lossy(&buf).into_owned()
    }

    #[test]
    fn test_unknown_route() {
        let dir = tempfile::tempdir().unwrap();
        let text = exchange(&test_server(dir.path(), 1024), b"GET /nope HTTP/1.1\r\n\r\n");

        assert!(text.starts_with("HTTP/1.1 404 Not Found"));
        assert!(text.contains("X-Request-Id: "));
        assert!(text.contains("Connection: close"));
    }

    #[test]
    fn test_unknown_discovery() {
        let dir = tempfile::tempdir().unwrap();
        let id = Uuid::new_v4();
        let raw = format!("GET /discoveries/{} HTTP/1.1\r\n\r\n", id);
        let text = exchange(&test_server(dir.path(), 1024), raw.as_bytes());

        assert!(text.starts_with("HTTP/1.1 404 Not Found"));
        assert!(text.contains("\"request_status\":\"unknown\""));
    }

    #[test]
    fn test_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let text = exchange(&test_server(dir.path(), 1024), b"\x00\x01\x02garbage\r\n\r\n");

        assert!(text.starts_with("HTTP/1.1 400 Bad Request"));
        assert!(text.contains("Invalid request"));
    }

    #[test]
    fn test_unsupported_method() {
        let dir = tempfile::tempdir().unwrap();
        let text = exchange(&test_server(dir.path(), 1024), b"BREW /discoveries HTTP/1.1\r\n\r\n");

        assert!(text.starts_with("HTTP/1.1 405 Method Not Allowed"));
    }

    #[test]
    fn test_body_too_large() {
        let dir = tempfile::tempdir().unwrap();
        let raw = b"POST /discoveries HTTP/1.1\r\nContent-Length: 2048\r\n\r\n";
        let text = exchange(&test_server(dir.path(), 1024), raw);

        assert!(text.starts_with("HTTP/1.1 413 Payload Too Large"));
    }

    #[test]
    fn test_incomplete_body() {
        let dir = tempfile::tempdir().unwrap();
        let raw = b"POST /discoveries HTTP/1.1\r\nContent-Length: 100\r\n\r\nshort";
        let text = exchange(&test_server(dir.path(), 1024), raw);

        assert!(text.starts_with("HTTP/1.1 400 Bad Request"));
        assert!(text.contains("Incomplete request body"));
    }

    #[test]
    fn test_expect_continue() {
        let dir = tempfile::tempdir().unwrap();
        let server = test_server(dir.path(), 1024);

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let router = Arc::clone(&server.router);

        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            Server::handle_connection(stream, &router, 1024).unwrap();
        });

        let mut client = TcpStream::connect(addr).unwrap();
        client
            .write_all(b"POST /discoveries HTTP/1.1\r\nExpect: 100-continue\r\nContent-Type: text/plain\r\nContent-Length: 4\r\n\r\n")
            .unwrap();

        let mut interim = [0u8; CONTINUE_RESPONSE.len()];
        client.read_exact(&mut interim).unwrap();
        assert_eq!(&interim, CONTINUE_RESPONSE);

        client.write_all(b"data").unwrap();
        let mut buf = Vec::new();
        client.read_to_end(&mut buf).unwrap();
        handle.join().unwrap();

        // Llegó al handler: no es multipart
        assert!(String::from_utf8_lossy(&buf).starts_with("HTTP/1.1 400 Bad Request"));
    }

    #[test]
    fn test_peer_closed_immediately() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let router = Arc::new(Router::new());

        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            Server::handle_connection(stream, &router, 1024).unwrap();
        });

        drop(TcpStream::connect(addr).unwrap());
        handle.join().unwrap();
    }
}
