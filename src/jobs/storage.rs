//! # Persistencia de Jobs
//! src/jobs/storage.rs
//!
//! Almacén clave-valor sobre el sistema de archivos: un directorio por
//! job, con el registro serializado en `request.json`.
//!
//! ```text
//! <root>/requests/<id>/
//! ├── request.json
//! ├── event_log.<ext>
//! ├── configuration.<ext>   (opcional)
//! └── output/               (lo escribe la herramienta externa)
//! ```
//!
//! Los callers solo conocen `create`, `load` y `save` más los helpers de
//! rutas; el layout puede cambiar sin tocarlos.

use crate::error::JobError;
use crate::jobs::types::{Job, JobStatus};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

const REQUESTS_DIR: &str = "requests";
const RECORD_FILE: &str = "request.json";
const RECORD_TEMP_FILE: &str = "request.json.tmp";
const OUTPUT_DIR: &str = "output";

/// Storage para persistir registros de jobs
#[derive(Debug, Clone)]
pub struct JobStore {
    /// Directorio `<root>/requests`, siempre absoluto
    requests_dir: PathBuf,
}

impl JobStore {
    /// Abre (o crea) el storage bajo `root`
    ///
    /// La ruta se vuelve absoluta para que los paths que recibe la
    /// herramienta externa no dependan de su directorio de trabajo.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, JobError> {
        let root = std::path::absolute(root.as_ref())?;
        let requests_dir = root.join(REQUESTS_DIR);
        fs::create_dir_all(&requests_dir)?;

        Ok(Self { requests_dir })
    }

    /// Directorio exclusivo del job
    pub fn job_dir(&self, id: &str) -> PathBuf {
        self.requests_dir.join(id)
    }

    /// Directorio donde la herramienta deja su salida
    pub fn output_dir(&self, id: &str) -> PathBuf {
        self.job_dir(id).join(OUTPUT_DIR)
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.job_dir(id).join(RECORD_FILE)
    }

    /// Reserva el namespace del job y escribe su registro inicial
    pub fn create(&self, id: &str, initial_status: JobStatus) -> Result<Job, JobError> {
        if initial_status == JobStatus::Unknown {
            return Err(JobError::InvalidRecord(
                "status 'unknown' cannot be persisted".to_string(),
            ));
        }

        // create_dir (no create_dir_all) falla si el namespace ya existe
        match fs::create_dir(self.job_dir(id)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(JobError::AlreadyExists(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        let job = Job::new(id, initial_status);
        self.save(&job)?;
        Ok(job)
    }

    /// Lee el registro actual de un job
    pub fn load(&self, id: &str) -> Result<Job, JobError> {
        let file = match File::open(self.record_path(id)) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(JobError::not_found(format!("Request {} not found", id)));
            }
            Err(e) => return Err(e.into()),
        };

        let job: Job = serde_json::from_reader(BufReader::new(file))?;
        // `unknown` solo existe en respuestas, nunca en disco
        if job.status == JobStatus::Unknown {
            return Err(JobError::InvalidRecord(format!(
                "Request {} has a non-persistable status",
                id
            )));
        }
        Ok(job)
    }

    /// Sobrescribe el registro de forma atómica
    ///
    /// Escribe a un archivo temporal y lo renombra sobre el definitivo:
    /// un `load` concurrente ve el registro viejo o el nuevo, nunca uno
    /// a medio escribir.
    pub fn save(&self, job: &Job) -> Result<(), JobError> {
        if job.status == JobStatus::Unknown {
            return Err(JobError::InvalidRecord(
                "status 'unknown' cannot be persisted".to_string(),
            ));
        }

        let job_dir = self.job_dir(&job.id);
        if !job_dir.is_dir() {
            return Err(JobError::not_found(format!("Request {} not found", job.id)));
        }

        let temp_path = job_dir.join(RECORD_TEMP_FILE);
        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, job)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;

        // Renombrar (atómico en sistemas Unix)
        fs::rename(&temp_path, self.record_path(&job.id))?;

        Ok(())
    }

    /// Escribe un archivo de entrada dentro del namespace del job
    ///
    /// Las entradas son inmutables: falla si el archivo ya existe.
    pub fn write_input(&self, id: &str, file_name: &str, data: &[u8]) -> Result<PathBuf, JobError> {
        let path = self.job_dir(id).join(file_name);
        let mut file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        file.write_all(data)?;
        file.sync_all()?;
        Ok(path)
    }

    /// Ids de todos los namespaces que tienen registro
    pub fn list_ids(&self) -> Result<Vec<String>, JobError> {
        let mut ids = Vec::new();

        for entry in fs::read_dir(&self.requests_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if !entry.path().join(RECORD_FILE).is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                ids.push(name.to_string());
            }
        }

        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, JobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::open(dir.path()).unwrap();
        (dir, store)
    }

    // ==================== Basic Operations ====================

    #[test]
    fn test_create_and_load() {
        let (_dir, store) = temp_store();

        let created = store.create("job-1", JobStatus::Accepted).unwrap();
        let loaded = store.load("job-1").unwrap();

        assert_eq!(created, loaded);
        assert_eq!(loaded.status, JobStatus::Accepted);
        assert!(store.job_dir("job-1").join("request.json").is_file());
    }

    #[test]
    fn test_create_twice_fails() {
        let (_dir, store) = temp_store();

        store.create("job-1", JobStatus::Accepted).unwrap();
        let result = store.create("job-1", JobStatus::Accepted);

        assert!(matches!(result, Err(JobError::AlreadyExists(id)) if id == "job-1"));
    }

    #[test]
    fn test_create_rejects_unknown() {
        let (_dir, store) = temp_store();
        let result = store.create("job-1", JobStatus::Unknown);

        assert!(matches!(result, Err(JobError::InvalidRecord(_))));
        assert!(!store.job_dir("job-1").exists());
    }

    #[test]
    fn test_load_nonexistent() {
        let (_dir, store) = temp_store();
        let result = store.load("nonexistent-id");

        assert!(matches!(result, Err(JobError::NotFound(_))));
    }

    // ==================== Save ====================

    #[test]
    fn test_save_round_trip() {
        let (_dir, store) = temp_store();

        let mut job = store.create("job-1", JobStatus::Accepted).unwrap();
        job.mark_running().unwrap();
        job.mark_success(store.output_dir("job-1")).unwrap();
        store.save(&job).unwrap();

        let loaded = store.load("job-1").unwrap();
        assert_eq!(loaded.id, job.id);
        assert_eq!(loaded.status, job.status);
        assert_eq!(loaded.timestamp, job.timestamp);
        assert_eq!(loaded.output_dir, job.output_dir);
        assert!(!store.job_dir("job-1").join("request.json.tmp").exists());
    }

    #[test]
    fn test_save_without_namespace_fails() {
        let (_dir, store) = temp_store();
        let job = Job::new("ghost", JobStatus::Accepted);

        assert!(matches!(store.save(&job), Err(JobError::NotFound(_))));
    }

    #[test]
    fn test_persistence_across_instances() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = JobStore::open(dir.path()).unwrap();
            let mut job = store.create("persist-1", JobStatus::Accepted).unwrap();
            job.mark_running().unwrap();
            store.save(&job).unwrap();
        }

        let store = JobStore::open(dir.path()).unwrap();
        assert_eq!(store.load("persist-1").unwrap().status, JobStatus::Running);
    }

    #[test]
    fn test_corrupted_record() {
        let (_dir, store) = temp_store();
        store.create("job-1", JobStatus::Accepted).unwrap();
        fs::write(store.job_dir("job-1").join("request.json"), b"{ not json").unwrap();

        assert!(matches!(store.load("job-1"), Err(JobError::Serialization(_))));
    }

    #[test]
    fn test_load_rejects_unknown_status() {
        let (_dir, store) = temp_store();
        store.create("job-1", JobStatus::Accepted).unwrap();
        fs::write(
            store.job_dir("job-1").join("request.json"),
            br#"{"id":"job-1","status":"unknown"}"#,
        )
        .unwrap();

        assert!(matches!(store.load("job-1"), Err(JobError::InvalidRecord(_))));
    }

    #[test]
    fn test_concurrent_load_never_sees_partial_record() {
        let (_dir, store) = temp_store();
        store.create("job-1", JobStatus::Accepted).unwrap();

        let writer_store = store.clone();
        let writer = std::thread::spawn(move || {
            for i in 0..200 {
                let mut job = Job::new("job-1", JobStatus::Accepted);
                // Registro más grande para que una escritura parcial sea visible
                job.output_dir = Some(std::path::PathBuf::from("x".repeat(1000 + i)));
                writer_store.save(&job).unwrap();
            }
        });

        while !writer.is_finished() {
            let job = store.load("job-1").unwrap();
            assert_eq!(job.id, "job-1");
        }
        writer.join().unwrap();
    }

    // ==================== Inputs & Listing ====================

    #[test]
    fn test_write_input_is_immutable() {
        let (_dir, store) = temp_store();
        store.create("job-1", JobStatus::Accepted).unwrap();

        let path = store.write_input("job-1", "event_log.csv", b"a,b\n1,2\n").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"a,b\n1,2\n");

        let again = store.write_input("job-1", "event_log.csv", b"other");
        assert!(matches!(again, Err(JobError::Io(_))));
        assert_eq!(fs::read(&path).unwrap(), b"a,b\n1,2\n");
    }

    #[test]
    fn test_list_ids_skips_incomplete_namespaces() {
        let (_dir, store) = temp_store();
        store.create("b", JobStatus::Accepted).unwrap();
        store.create("a", JobStatus::Accepted).unwrap();
        fs::create_dir(store.job_dir("no-record")).unwrap();

        assert_eq!(store.list_ids().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_root_is_absolute() {
        let (_dir, store) = temp_store();
        assert!(store.job_dir("x").is_absolute());
        assert!(store.output_dir("x").ends_with("x/output"));
    }
}
