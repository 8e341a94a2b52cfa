//! # Artefactos de Resultado
//! src/jobs/artifacts.rs
//!
//! Resuelve lo que un cliente puede descargar de un job exitoso: un
//! archivo individual de la salida o el archivo `.tar.gz` completo de
//! `best_result/`.

use crate::error::JobError;
use crate::jobs::types::{Job, JobStatus};
use flate2::write::GzEncoder;
use flate2::{Compression, GzBuilder};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Nombre reservado que pide el archivo completo
pub const ARCHIVE_TOKEN: &str = "results.tar.gz";

/// Subdirectorio donde la herramienta deja sus entregables finales
pub const RESULT_SUBDIR: &str = "best_result";

/// Contenido listo para enviar al cliente
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub file_name: String,
    pub media_type: &'static str,
    pub content: Vec<u8>,
}

/// Infiere el media type a partir de la extensión
pub fn media_type(file_name: &str) -> &'static str {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("csv") => "text/csv",
        Some("xml") | Some("xes") | Some("bpmn") => "application/xml",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        Some("gz") => "application/gzip",
        Some("tar") => "application/tar",
        _ => "application/octet-stream",
    }
}

/// Un nombre de archivo pedido no puede salir del directorio de salida
fn is_safe_name(name: &str) -> bool {
    !name.is_empty() && !name.contains("..") && !name.contains('/') && !name.contains('\\')
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactLocator;

impl ArtifactLocator {
    pub fn new() -> Self {
        Self
    }

    /// Directorio de salida de un job exitoso que todavía existe en disco
    fn output_dir<'a>(&self, job: &'a Job) -> Result<&'a Path, JobError> {
        if job.status != JobStatus::Success {
            return Err(JobError::not_found("Output not found"));
        }
        match job.output_dir.as_deref() {
            Some(dir) if dir.is_dir() => Ok(dir),
            _ => Err(JobError::not_found("Output not found")),
        }
    }

    /// Ruta del subdirectorio canónico, si el job lo produjo
    pub fn result_dir(&self, job: &Job) -> Option<PathBuf> {
        let dir = self.output_dir(job).ok()?.join(RESULT_SUBDIR);
        dir.is_dir().then_some(dir)
    }

    /// Resuelve `name` (o el token de archivo) a su contenido
    pub fn resolve_file(&self, job: &Job, name: &str) -> Result<Artifact, JobError> {
        let output_dir = self.output_dir(job)?;

        if name == ARCHIVE_TOKEN {
            let result_dir = output_dir.join(RESULT_SUBDIR);
            if !result_dir.is_dir() {
                return Err(JobError::not_found("Results not found"));
            }
            let archive_path = build_archive(&result_dir, &output_dir.join(ARCHIVE_TOKEN))?;
            return Ok(Artifact {
                file_name: ARCHIVE_TOKEN.to_string(),
                media_type: media_type(ARCHIVE_TOKEN),
                content: fs::read(archive_path)?,
            });
        }

        if !is_safe_name(name) {
            return Err(JobError::not_found(format!("File not found: {}", name)));
        }

        // Primero en best_result/, luego en la raíz de la salida
        let path = [output_dir.join(RESULT_SUBDIR).join(name), output_dir.join(name)]
            .into_iter()
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| JobError::not_found(format!("File not found: {}", name)))?;

        Ok(Artifact {
            file_name: name.to_string(),
            media_type: media_type(name),
            content: fs::read(path)?,
        })
    }
}

/// Empaqueta `source_dir` en un `.tar.gz` en `archive_path`
///
/// Se escribe a un temporal único y se renombra encima de cualquier
/// archivo viejo, así dos pedidos simultáneos no se pisan. Con la misma
/// entrada el resultado es byte a byte idéntico.
fn build_archive(source_dir: &Path, archive_path: &Path) -> Result<PathBuf, JobError> {
    let temp_path = archive_path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));

    let result = write_archive(source_dir, &temp_path)
        .and_then(|()| fs::rename(&temp_path, archive_path).map_err(JobError::from));
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result?;

    Ok(archive_path.to_path_buf())
}

fn write_archive(source_dir: &Path, target: &Path) -> Result<(), JobError> {
    let file = BufWriter::new(File::create(target)?);
    // mtime = 0 en el header gzip para que el contenido sea reproducible
    let encoder: GzEncoder<BufWriter<File>> = GzBuilder::new().mtime(0).write(file, Compression::default());

    let mut builder = tar::Builder::new(encoder);
    builder.mode(tar::HeaderMode::Deterministic);
    builder.follow_symlinks(false);

    for relative in collect_files(source_dir)? {
        builder.append_path_with_name(source_dir.join(&relative), &relative)?;
    }

    let encoder = builder.into_inner()?;
    let mut writer = encoder.finish()?;
    writer.flush()?;
    writer.get_ref().sync_all()?;

    Ok(())
}

/// Rutas relativas de todos los archivos bajo `root`, ordenadas
fn collect_files(root: &Path) -> Result<Vec<PathBuf>, JobError> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(root) {
            files.push(relative.to_path_buf());
        }
    }

    // El orden de walkdir es por directorio; el tar se arma con rutas ordenadas
    files.sort();
    Ok(files)
}
