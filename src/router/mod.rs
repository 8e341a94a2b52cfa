//! # Sistema de Routing
//! src/router/mod.rs
//!
//! Mapea método + path a handlers.
//!
//! ```text
//! Request → Router → Handler → Response
//! ```
//!
//! Los patrones admiten segmentos variables: `/discoveries/{id}` captura
//! el segundo segmento como `id`. Si el path coincide con alguna ruta
//! pero no con el método se responde 405; si no coincide con ninguna,
//! 404.

use crate::http::request::percent_decode;
use crate::http::{Method, Request, Response, StatusCode};
use std::collections::HashMap;

/// Parámetros capturados del path
pub type Params = HashMap<String, String>;

/// Un handler recibe el request y los parámetros capturados
pub type Handler = Box<dyn Fn(&Request, &Params) -> Response + Send + Sync>;

enum Segment {
    Literal(String),
    Param(String),
}

struct Route {
    method: Method,
    segments: Vec<Segment>,
    handler: Handler,
}

impl Route {
    /// Intenta capturar los parámetros de `path`
    fn capture(&self, path: &[&str]) -> Option<Params> {
        if path.len() != self.segments.len() {
            return None;
        }

        let mut params = Params::new();
        for (segment, value) in self.segments.iter().zip(path) {
            match segment {
                Segment::Literal(literal) if literal == value => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => {
                    if value.is_empty() {
                        return None;
                    }
                    params.insert(name.clone(), percent_decode(value));
                }
            }
        }
        Some(params)
    }
}

fn split_path(path: &str) -> Vec<&str> {
    path.trim_matches('/').split('/').collect()
}

/// Router que mapea rutas a handlers
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra una ruta con su handler
    ///
    /// # Ejemplo
    /// ```
    /// use discovery_server::router::Router;
    /// use discovery_server::http::{Method, Request, Response, StatusCode};
    ///
    /// let mut router = Router::new();
    /// router.register(Method::GET, "/hello/{name}", |_req, params| {
    ///     Response::new(StatusCode::Ok).with_body(&params["name"])
    /// });
    ///
    /// let request = Request::parse(b"GET /hello/world HTTP/1.0\r\n\r\n").unwrap();
    /// assert_eq!(router.route(&request).body(), b"world");
    /// ```
    pub fn register<F>(&mut self, method: Method, pattern: &str, handler: F)
    where
        F: Fn(&Request, &Params) -> Response + Send + Sync + 'static,
    {
        let segments = split_path(pattern)
            .into_iter()
            .map(|segment| {
                match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                    Some(name) => Segment::Param(name.to_string()),
                    None => Segment::Literal(segment.to_string()),
                }
            })
            .collect();

        self.routes.push(Route {
            method,
            segments,
            handler: Box::new(handler),
        });
    }

    /// Despacha el request al primer handler que coincide
    pub fn route(&self, request: &Request) -> Response {
        let path = split_path(request.path());
        let mut allowed = Vec::new();

        for route in &self.routes {
            let Some(params) = route.capture(&path) else {
                continue;
            };
            if route.method == request.method() {
                let mut response = (route.handler)(request, &params);
                Self::add_common_headers(&mut response);
                return response;
            }
            allowed.push(route.method.as_str());
        }

        let mut response = if allowed.is_empty() {
            Response::error(StatusCode::NotFound, &format!("Route not found: {}", request.path()))
        } else {
            Response::error(
                StatusCode::MethodNotAllowed,
                &format!("Method {} not allowed", request.method()),
            )
            .with_header("Allow", &allowed.join(", "))
        };
        Self::add_common_headers(&mut response);
        response
    }

    /// Headers comunes a todas las respuestas
    fn add_common_headers(response: &mut Response) {
        response.add_header("Server", "discovery-server");
        response.add_header("Connection", "close");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> Router {
        let mut router = Router::new();
        router.register(Method::POST, "/discoveries", |_req, _params| {
            Response::new(StatusCode::Accepted)
        });
        router.register(Method::GET, "/discoveries/{id}", |_req, params| {
            Response::new(StatusCode::Ok).with_body(&params["id"])
        });
        router.register(Method::GET, "/discoveries/{id}/{file_name}", |_req, params| {
            Response::new(StatusCode::Ok).with_body(&format!("{}|{}", params["id"], params["file_name"]))
        });
        router
    }

    fn get(router: &Router, raw: &[u8]) -> Response {
        router.route(&Request::parse(raw).unwrap())
    }

    #[test]
    fn test_route_literal() {
        let response = get(&router(), b"POST /discoveries HTTP/1.1\r\n\r\n");
        assert_eq!(response.status(), StatusCode::Accepted);
        assert_eq!(response.header("Connection"), Some("close"));
    }

    #[test]
    fn test_route_params() {
        let response = get(&router(), b"GET /discoveries/abc HTTP/1.1\r\n\r\n");
        assert_eq!(response.body(), b"abc");

        let response = get(&router(), b"GET /discoveries/abc/model.bpmn HTTP/1.1\r\n\r\n");
        assert_eq!(response.body(), b"abc|model.bpmn");
    }

    #[test]
    fn test_params_are_decoded() {
        let response = get(&router(), b"GET /discoveries/abc/my%20file.csv HTTP/1.1\r\n\r\n");
        assert_eq!(response.body(), b"abc|my file.csv");
    }

    #[test]
    fn test_plus_is_literal_in_params() {
        let response = get(&router(), b"GET /discoveries/abc/a+b.csv HTTP/1.1\r\n\r\n");
        assert_eq!(response.body(), b"abc|a+b.csv");
    }

    #[test]
    fn test_trailing_slash() {
        let response = get(&router(), b"GET /discoveries/abc/ HTTP/1.1\r\n\r\n");
        assert_eq!(response.body(), b"abc");
    }

    #[test]
    fn test_route_not_found() {
        let response = get(&router(), b"GET /nonexistent HTTP/1.1\r\n\r\n");
        assert_eq!(response.status(), StatusCode::NotFound);

        let response = get(&router(), b"GET /discoveries/a/b/c HTTP/1.1\r\n\r\n");
        assert_eq!(response.status(), StatusCode::NotFound);
    }

    #[test]
    fn test_method_not_allowed() {
        let response = get(&router(), b"GET /discoveries HTTP/1.1\r\n\r\n");
        assert_eq!(response.status(), StatusCode::MethodNotAllowed);
        assert_eq!(response.header("Allow"), Some("POST"));

        let response = get(&router(), b"DELETE /discoveries/abc HTTP/1.1\r\n\r\n");
        assert_eq!(response.status(), StatusCode::MethodNotAllowed);
    }
}
