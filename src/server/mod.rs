//! # Módulo del Servidor HTTP
//! src/server/mod.rs
//!
//! Servidor TCP que:
//! 1. Escucha en un puerto
//! 2. Acepta conexiones, una por thread
//! 3. Lee y parsea requests HTTP (cabecera + body)
//! 4. Despacha al router y envía la respuesta

pub mod tcp;

pub use tcp::Server;
