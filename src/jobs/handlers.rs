//! # Handlers HTTP de Descubrimiento
//! src/jobs/handlers.rs
//!
//! Endpoints del servicio:
//! - `POST /discoveries`
//! - `GET /discoveries/{id}`
//! - `GET /discoveries/{id}/{file_name}`

use crate::error::JobError;
use crate::http::multipart::{self, Part};
use crate::http::{Request, Response, StatusCode};
use crate::jobs::service::{JobService, Submission, Upload};
use crate::jobs::types::{DiscoveryResponse, JobStatus, UnknownDiscoveryResponse};
use crate::router::Params;
use tracing::{error, warn};

/// Segundos sugeridos al cliente cuando la cola está llena
const RETRY_AFTER_SECS: &str = "5";

/// Traduce errores del servicio a respuestas HTTP
fn error_response(error: &JobError) -> Response {
    match error {
        JobError::NotFound(message) => Response::error(StatusCode::NotFound, message),
        JobError::InvalidSubmission(message) => Response::error(StatusCode::BadRequest, message),
        JobError::QueueFull(_) | JobError::QueueClosed => {
            warn!(error = %error, "Rejecting discovery request");
            Response::error(StatusCode::ServiceUnavailable, &error.to_string())
                .with_header("Retry-After", RETRY_AFTER_SECS)
        }
        other => {
            error!(error = %other, "Internal error handling discovery request");
            Response::error(StatusCode::InternalServerError, "Internal server error")
        }
    }
}

fn upload_from(part: Part) -> Upload {
    Upload {
        data: part.data,
        content_type: part.content_type,
        filename: part.filename,
    }
}

/// Arma la submission a partir del body multipart
///
/// Campos: `event_log` (requerido), `configuration` y `callback_url`
/// (opcionales). Campos desconocidos se ignoran.
fn parse_submission(req: &Request) -> Result<Submission, Response> {
    let content_type = req.header("content-type").unwrap_or_default();
    let boundary = multipart::boundary(content_type)
        .map_err(|e| Response::error(StatusCode::BadRequest, &e.to_string()))?;
    let parts = multipart::parse(req.body(), &boundary)
        .map_err(|e| Response::error(StatusCode::BadRequest, &e.to_string()))?;

    let mut event_log = None;
    let mut configuration = None;
    let mut callback_url = None;

    for part in parts {
        match part.name.as_str() {
            "event_log" => event_log = Some(upload_from(part)),
            "configuration" if !part.data.is_empty() => configuration = Some(upload_from(part)),
            "callback_url" => {
                callback_url = part
                    .text()
                    .map(str::trim)
                    .filter(|url| !url.is_empty())
                    .map(str::to_string);
            }
            _ => {}
        }
    }

    let event_log = event_log
        .filter(|upload| !upload.data.is_empty())
        .ok_or_else(|| Response::error(StatusCode::BadRequest, "Missing required field: event_log"))?;

    Ok(Submission {
        event_log,
        configuration,
        callback_url,
    })
}

/// Handler para `POST /discoveries`
///
/// Registra el job y responde 202 sin esperar la ejecución.
///
/// # Ejemplo de response
/// ```json
/// {"request_id": "6f1c...", "request_status": "accepted"}
/// ```
pub fn submit_handler(req: &Request, _params: &Params, service: &JobService) -> Response {
    let submission = match parse_submission(req) {
        Ok(submission) => submission,
        Err(response) => return response,
    };

    match service.submit(submission) {
        Ok(receipt) => Response::json(
            StatusCode::Accepted,
            &DiscoveryResponse {
                request_id: receipt.request_id,
                request_status: receipt.status,
                archive_url: None,
            },
        ),
        Err(e) => error_response(&e),
    }
}

/// Handler para `GET /discoveries/{id}`
///
/// Un id desconocido responde 404 con `request_status: "unknown"`.
pub fn status_handler(_req: &Request, params: &Params, service: &JobService) -> Response {
    let id = params.get("id").map(String::as_str).unwrap_or_default();
    let report = match service.get_status(id) {
        Ok(report) => report,
        Err(e) => return error_response(&e),
    };

    if report.status == JobStatus::Unknown {
        return Response::json(
            StatusCode::NotFound,
            &UnknownDiscoveryResponse {
                request_id: report.request_id,
                request_status: report.status,
                message: "Request not found".to_string(),
            },
        );
    }

    Response::json(
        StatusCode::Ok,
        &DiscoveryResponse {
            request_id: report.request_id,
            request_status: report.status,
            archive_url: report.archive_url,
        },
    )
}

/// Handler para `GET /discoveries/{id}/{file_name}`
///
/// `results.tar.gz` devuelve el archivo completo de resultados; otro
/// nombre devuelve ese archivo de la salida.
pub fn artifact_handler(_req: &Request, params: &Params, service: &JobService) -> Response {
    let id = params.get("id").map(String::as_str).unwrap_or_default();
    let file_name = params.get("file_name").map(String::as_str).unwrap_or_default();

    match service.get_artifact(id, file_name) {
        Ok(artifact) => Response::attachment(&artifact.file_name, artifact.media_type, artifact.content),
        Err(e) => error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::runner::{ExternalTool, JobRunner};
    use crate::jobs::storage::JobStore;

    fn service(dir: &std::path::Path, capacity: usize) -> JobService {
        let store = JobStore::open(dir).unwrap();
        let runner = JobRunner::new(store.clone(), ExternalTool::new("true"));
        JobService::new(store, runner, capacity)
    }

    fn multipart_request(fields: &[(&str, Option<&str>, &[u8])]) -> Request {
        let mut body = Vec::new();
        for (name, filename, data) in fields {
            body.extend_from_slice(b"--B\r\n");
            match filename {
                Some(filename) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: text/csv\r\n\r\n",
                        name, filename
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                ),
            }
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(b"--B--\r\n");

        let mut raw = format!(
            "POST /discoveries HTTP/1.1\r\nContent-Type: multipart/form-data; boundary=B\r\nContent-Length: {}\r\n\r\n",
            body.len()
        )
        .into_bytes();
        raw.extend_from_slice(&body);
        Request::parse(&raw).unwrap()
    }

    fn json(response: &Response) -> serde_json::Value {
        serde_json::from_slice(response.body()).unwrap()
    }

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_submit_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), 10);

        let req = multipart_request(&[("event_log", Some("log.csv"), b"a,b\n1,2\n")]);
        let response = submit_handler(&req, &Params::new(), &service);

        assert_eq!(response.status(), StatusCode::Accepted);
        let body = json(&response);
        assert_eq!(body["request_status"], "accepted");
        assert!(body.get("archive_url").is_none());

        let id = body["request_id"].as_str().unwrap();
        assert!(uuid::Uuid::parse_str(id).is_ok());
    }

    #[test]
    fn test_submit_missing_event_log() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), 10);

        let req = multipart_request(&[("callback_url", None, b"http://example.com")]);
        let response = submit_handler(&req, &Params::new(), &service);

        assert_eq!(response.status(), StatusCode::BadRequest);
        assert!(json(&response)["message"].as_str().unwrap().contains("event_log"));
    }

    #[test]
    fn test_submit_empty_event_log() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), 10);

        let req = multipart_request(&[("event_log", Some("log.csv"), b"")]);
        assert_eq!(submit_handler(&req, &Params::new(), &service).status(), StatusCode::BadRequest);
    }

    #[test]
    fn test_submit_not_multipart() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), 10);

        let req = Request::parse(b"POST /discoveries HTTP/1.1\r\nContent-Type: application/json\r\n\r\n{}").unwrap();
        assert_eq!(submit_handler(&req, &Params::new(), &service).status(), StatusCode::BadRequest);
    }

    #[test]
    fn test_submit_queue_full() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), 1);
        let req = multipart_request(&[("event_log", Some("log.csv"), b"a,b\n")]);

        assert_eq!(submit_handler(&req, &Params::new(), &service).status(), StatusCode::Accepted);
        let response = submit_handler(&req, &Params::new(), &service);

        assert_eq!(response.status(), StatusCode::ServiceUnavailable);
        assert_eq!(response.header("Retry-After"), Some(RETRY_AFTER_SECS));
    }

    #[test]
    fn test_status_known_and_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), 10);

        let req = multipart_request(&[("event_log", Some("log.csv"), b"a,b\n")]);
        let submitted = json(&submit_handler(&req, &Params::new(), &service));
        let id = submitted["request_id"].as_str().unwrap();

        let get = Request::parse(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        let response = status_handler(&get, &params(&[("id", id)]), &service);
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(json(&response)["request_status"], "accepted");

        let missing = uuid::Uuid::new_v4().to_string();
        let response = status_handler(&get, &params(&[("id", &missing)]), &service);
        assert_eq!(response.status(), StatusCode::NotFound);
        let body = json(&response);
        assert_eq!(body["request_id"], missing.as_str());
        assert_eq!(body["request_status"], "unknown");
        assert_eq!(body["message"], "Request not found");
    }

    #[test]
    fn test_status_corrupted_record() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), 10);
        let id = uuid::Uuid::new_v4().to_string();

        service.store().create(&id, JobStatus::Accepted).unwrap();
        std::fs::write(service.store().job_dir(&id).join("request.json"), b"{ not json").unwrap();

        let get = Request::parse(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        let response = status_handler(&get, &params(&[("id", &id)]), &service);

        assert_eq!(response.status(), StatusCode::InternalServerError);
        assert!(json(&response)["message"].is_string());
    }

    #[test]
    fn test_artifact_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), 10);

        let req = multipart_request(&[("event_log", Some("log.csv"), b"a,b\n")]);
        let submitted = json(&submit_handler(&req, &Params::new(), &service));
        let id = submitted["request_id"].as_str().unwrap();

        let get = Request::parse(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        let response = artifact_handler(&get, &params(&[("id", id), ("file_name", "results.tar.gz")]), &service);

        assert_eq!(response.status(), StatusCode::NotFound);
        assert!(json(&response)["message"].is_string());
    }
}
