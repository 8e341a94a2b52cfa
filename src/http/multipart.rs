//! # Parsing de multipart/form-data
//! src/http/multipart.rs
//!
//! Separa un body `multipart/form-data` (RFC 7578) en sus partes. Cada
//! parte conserva sus bytes exactos: los event logs no se reinterpretan.
//!
//! ```text
//! --BOUNDARY\r\n
//! Content-Disposition: form-data; name="event_log"; filename="log.csv"\r\n
//! Content-Type: text/csv\r\n
//! \r\n
//! <bytes>\r\n
//! --BOUNDARY--\r\n
//! ```

use super::request::{find_header_end, HEADER_TERMINATOR};

/// Una parte del formulario
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl Part {
    /// Contenido como texto (campos simples como `callback_url`)
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MultipartError {
    #[error("Content-Type is not multipart/form-data")]
    NotMultipart,

    #[error("Missing multipart boundary")]
    MissingBoundary,

    #[error("Malformed multipart body: {0}")]
    Malformed(&'static str),

    #[error("Multipart part without a name")]
    MissingName,
}

/// Extrae el boundary de un header `Content-Type`
///
/// # Ejemplo
/// ```
/// use discovery_server::http::multipart::boundary;
///
/// let ct = "multipart/form-data; boundary=\"abc123\"";
/// assert_eq!(boundary(ct).unwrap(), "abc123");
/// ```
pub fn boundary(content_type: &str) -> Result<String, MultipartError> {
    let mut params = content_type.split(';');
    let mime = params.next().unwrap_or_default().trim();
    if !mime.eq_ignore_ascii_case("multipart/form-data") {
        return Err(MultipartError::NotMultipart);
    }

    header_params(content_type)
        .into_iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
        .ok_or(MultipartError::MissingBoundary)
}

/// Separa un body multipart en partes
pub fn parse(body: &[u8], boundary: &str) -> Result<Vec<Part>, MultipartError> {
    let delimiter = format!("--{}", boundary).into_bytes();
    let next_delimiter = format!("\r\n--{}", boundary).into_bytes();

    let mut pos = find(body, &delimiter)
        .ok_or(MultipartError::Malformed("no opening boundary"))?
        + delimiter.len();
    let mut parts = Vec::new();

    loop {
        let rest = &body[pos..];
        if rest.starts_with(b"--") {
            return Ok(parts);
        }

        // Ignora espacios de transporte antes del CRLF del delimitador
        let line_end = find(rest, b"\r\n").ok_or(MultipartError::Malformed("truncated boundary line"))?;
        if !rest[..line_end].iter().all(|b| *b == b' ' || *b == b'\t') {
            return Err(MultipartError::Malformed("garbage after boundary"));
        }
        let part_start = pos + line_end + 2;

        let part = &body[part_start..];
        let (head, data_start) = if part.starts_with(b"\r\n") {
            ("", part_start + 2)
        } else {
            let head_end = find_header_end(part).ok_or(MultipartError::Malformed("unterminated part headers"))?;
            let head = std::str::from_utf8(&part[..head_end])
                .map_err(|_| MultipartError::Malformed("part headers are not UTF-8"))?;
            (head, part_start + head_end + HEADER_TERMINATOR.len())
        };

        let data_len = find(&body[data_start..], &next_delimiter)
            .ok_or(MultipartError::Malformed("missing closing boundary"))?;

        parts.push(build_part(head, body[data_start..data_start + data_len].to_vec())?);
        pos = data_start + data_len + next_delimiter.len();
    }
}

fn build_part(head: &str, data: Vec<u8>) -> Result<Part, MultipartError> {
    let mut name = None;
    let mut filename = None;
    let mut content_type = None;

    for line in head.split("\r\n") {
        let Some((header, value)) = line.split_once(':') else {
            continue;
        };

        if header.trim().eq_ignore_ascii_case("content-disposition") {
            for (key, param) in header_params(value) {
                if key.eq_ignore_ascii_case("name") {
                    name = Some(param);
                } else if key.eq_ignore_ascii_case("filename") {
                    filename = Some(param);
                }
            }
        } else if header.trim().eq_ignore_ascii_case("content-type") {
            content_type = Some(value.trim().to_string());
        }
    }

    Ok(Part {
        name: name.ok_or(MultipartError::MissingName)?,
        filename,
        content_type,
        data,
    })
}

/// Parámetros `key=value` de un header, después del primer `;`
///
/// Respeta comillas, así que `filename="a;b.csv"` queda entero.
fn header_params(value: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut escaped = false;

    for c in value.chars() {
        match c {
            _ if escaped => {
                current.push(c);
                escaped = false;
            }
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ';' if !quoted => segments.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    segments.push(current);

    // El primer segmento es el valor principal (ej: form-data)
    for segment in segments.into_iter().skip(1) {
        if let Some((key, value)) = segment.split_once('=') {
            params.push((key.trim().to_string(), value.trim().to_string()));
        }
    }

    params
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(parts: &[(&str, Option<&str>, Option<&str>, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, filename, content_type, data) in parts {
            body.extend_from_slice(b"--XyZ\r\n");
            let mut disposition = format!("Content-Disposition: form-data; name=\"{}\"", name);
            if let Some(filename) = filename {
                disposition.push_str(&format!("; filename=\"{}\"", filename));
            }
            body.extend_from_slice(disposition.as_bytes());
            body.extend_from_slice(b"\r\n");
            if let Some(content_type) = content_type {
                body.extend_from_slice(format!("Content-Type: {}\r\n", content_type).as_bytes());
            }
            body.extend_from_slice(b"\r\n");
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(b"--XyZ--\r\n");
        body
    }

    #[test]
    fn test_boundary() {
        assert_eq!(boundary("multipart/form-data; boundary=XyZ").unwrap(), "XyZ");
        assert_eq!(boundary("Multipart/Form-Data;boundary=\"a b\"").unwrap(), "a b");
        assert_eq!(boundary("application/json"), Err(MultipartError::NotMultipart));
        assert_eq!(boundary("multipart/form-data"), Err(MultipartError::MissingBoundary));
    }

    #[test]
    fn test_parse_file_and_field() {
        let body = form(&[
            ("event_log", Some("log.csv"), Some("text/csv"), b"case_id,activity\n1,A\n"),
            ("callback_url", None, None, b"http://example.com/hook"),
        ]);

        let parts = parse(&body, "XyZ").unwrap();
        assert_eq!(parts.len(), 2);

        assert_eq!(parts[0].name, "event_log");
        assert_eq!(parts[0].filename.as_deref(), Some("log.csv"));
        assert_eq!(parts[0].content_type.as_deref(), Some("text/csv"));
        assert_eq!(parts[0].data, b"case_id,activity\n1,A\n");

        assert_eq!(parts[1].name, "callback_url");
        assert_eq!(parts[1].filename, None);
        assert_eq!(parts[1].text(), Some("http://example.com/hook"));
    }

    #[test]
    fn test_binary_data_with_crlf_is_preserved() {
        let data: &[u8] = &[0x00, b'\r', b'\n', b'-', b'-', 0xFF, b'\r', b'\n'];
        let body = form(&[("event_log", Some("log.xes"), None, data)]);

        let parts = parse(&body, "XyZ").unwrap();
        assert_eq!(parts[0].data, data);
    }

    #[test]
    fn test_quoted_filename_with_semicolon() {
        let body = form(&[("event_log", Some("a;b.csv"), None, b"x")]);
        let parts = parse(&body, "XyZ").unwrap();
        assert_eq!(parts[0].filename.as_deref(), Some("a;b.csv"));
    }

    #[test]
    fn test_empty_form() {
        assert!(parse(b"--XyZ--\r\n", "XyZ").unwrap().is_empty());
    }

    #[test]
    fn test_missing_closing_boundary() {
        let body = b"--XyZ\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nvalue";
        assert!(matches!(parse(body, "XyZ"), Err(MultipartError::Malformed(_))));
    }

    #[test]
    fn test_missing_opening_boundary() {
        assert!(matches!(parse(b"hello", "XyZ"), Err(MultipartError::Malformed(_))));
    }

    #[test]
    fn test_part_without_name() {
        let body = b"--XyZ\r\nContent-Disposition: form-data\r\n\r\nvalue\r\n--XyZ--\r\n";
        assert_eq!(parse(body, "XyZ"), Err(MultipartError::MissingName));
    }
}
