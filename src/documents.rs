//! Almacén de PDFs subidos por el usuario (una carpeta local).

use std::path::{Path, PathBuf};

use mime_guess::MimeGuess;
use thiserror::Error;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::models::DocumentRecord;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("{name} exceeds the {limit_mb}MB limit and was not saved.")]
    TooLarge { name: String, limit_mb: u64 },
    #[error("{0} is not a PDF file and was not saved.")]
    NotPdf(String),
    #[error("{0} is not a valid document name.")]
    InvalidName(String),
    #[error("{0} was not found in the document folder.")]
    NotFound(String),
    #[error("I/O error in the document folder: {0}")]
    Io(#[from] std::io::Error),
}

/// Sustituye cualquier carácter fuera de `[A-Za-z0-9_.-]` por `_`.
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn is_pdf_name(filename: &str) -> bool {
    MimeGuess::from_path(filename)
        .first()
        .map(|mime| mime.essence_str() == "application/pdf")
        .unwrap_or(false)
}

/// Carpeta de documentos con su límite de tamaño por fichero.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
    max_bytes: u64,
}

impl DocumentStore {
    pub fn new(root: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            root: root.into(),
            max_bytes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_size_mb(&self) -> u64 {
        self.max_bytes / (1024 * 1024)
    }

    pub async fn ensure_folder(&self) -> Result<(), DocumentError> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// Rechaza un fichero por tamaño antes de escribir nada.
    pub fn check_size(&self, name: &str, size_bytes: u64) -> Result<(), DocumentError> {
        if size_bytes > self.max_bytes {
            return Err(DocumentError::TooLarge {
                name: name.to_string(),
                limit_mb: self.max_size_mb(),
            });
        }
        Ok(())
    }

    /// Guarda un PDF subido con su nombre saneado, sobrescribiendo si existe.
    pub async fn save(&self, original_name: &str, bytes: &[u8]) -> Result<DocumentRecord, DocumentError> {
        self.check_size(original_name, bytes.len() as u64)?;

        let filename = sanitize_filename(original_name);
        if !is_pdf_name(&filename) {
            return Err(DocumentError::NotPdf(original_name.to_string()));
        }

        self.ensure_folder().await?;
        let path = self.path_of(&filename)?;
        tokio::fs::write(&path, bytes).await?;
        info!("PDF guardado: {} ({} bytes)", path.display(), bytes.len());

        Ok(DocumentRecord {
            filename,
            size_bytes: bytes.len() as u64,
        })
    }

    /// Lista los `.pdf` de la carpeta (sin recursión), ordenados por nombre.
    pub fn list(&self) -> Result<Vec<DocumentRecord>, DocumentError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).max_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Entrada ilegible en {}: {}", self.root.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let filename = entry.file_name().to_string_lossy().to_string();
            if !filename.to_lowercase().ends_with(".pdf") {
                continue;
            }
            let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
            records.push(DocumentRecord { filename, size_bytes });
        }

        records.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(records)
    }

    /// Ruta de un documento ya almacenado. Sólo acepta nombres saneados,
    /// así que el resultado nunca sale de la carpeta.
    pub fn path_of(&self, filename: &str) -> Result<PathBuf, DocumentError> {
        if filename.is_empty() || filename == "." || filename == ".." || sanitize_filename(filename) != filename {
            return Err(DocumentError::InvalidName(filename.to_string()));
        }
        Ok(self.root.join(filename))
    }

    /// Como `path_of`, pero exige que el fichero exista.
    pub fn existing_path(&self, filename: &str) -> Result<PathBuf, DocumentError> {
        let path = self.path_of(filename)?;
        if !path.is_file() {
            return Err(DocumentError::NotFound(filename.to_string()));
        }
        Ok(path)
    }
}
