//! Ingesta de los PDFs seleccionados: extracción de texto, troceado con
//! solapamiento, embeddings y escritura de una versión nueva del índice.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    app_state::Status,
    documents::DocumentStore,
    llm::Embedder,
    vector_store::{ChunkDoc, IndexArtifact, IndexHandle, IndexStore},
};

/// Extrae el texto plano de un documento.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<String>;
}

/// Extractor basado en `pdf-extract`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfExtractor;

impl TextExtractor for PdfExtractor {
    fn extract(&self, path: &Path) -> Result<String> {
        pdf_extract::extract_text(path).map_err(|e| anyhow!("{e}"))
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Please select at least one PDF to process.")]
    NoSelection,
    #[error("No extractable text found in the selected PDF(s).")]
    NoExtractableText { failures: Vec<String> },
    #[error("Failed to process PDF(s): {0}")]
    Other(#[from] anyhow::Error),
}

/// Resumen de los resultados de una operación de ingesta.
#[derive(Debug, Default)]
pub struct IngestionSummary {
    pub files_ingested: Vec<String>,
    pub failures: Vec<String>,
    pub chunks_created: usize,
    pub handle: Option<IndexHandle>,
}

/// Implementa cómo se mostrará el resumen como texto.
impl std::fmt::Display for IngestionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} file(s) indexed, {} failed, {} chunks.",
            self.files_ingested.len(),
            self.failures.len(),
            self.chunks_created
        )
    }
}

/// Texto agregado de varios ficheros y los errores por fichero.
#[derive(Debug, Default)]
pub struct ExtractionReport {
    pub text: String,
    pub extracted: Vec<String>,
    pub failures: Vec<String>,
}

/// Extrae un fichero convirtiendo un pánico del extractor en error:
/// `pdf-extract` entra en pánico con algunas fuentes mal formadas.
fn extract_isolated(extractor: &dyn TextExtractor, path: &Path) -> Result<String> {
    panic::catch_unwind(AssertUnwindSafe(|| extractor.extract(path))).unwrap_or_else(|payload| {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(anyhow!("the PDF parser crashed: {reason}"))
    })
}

/// Extrae y concatena el texto de cada fichero, en minúsculas. Un fichero
/// que falla (o hace entrar en pánico al extractor) se anota y se continúa
/// con el resto.
pub fn extract_documents(
    documents: &DocumentStore,
    extractor: &dyn TextExtractor,
    filenames: &[String],
) -> ExtractionReport {
    let mut report = ExtractionReport::default();

    for filename in filenames {
        let result = documents
            .existing_path(filename)
            .map_err(anyhow::Error::from)
            .and_then(|path| extract_isolated(extractor, &path));

        match result {
            Ok(text) => {
                report.text.push_str(&text);
                report.extracted.push(filename.clone());
            }
            Err(e) => {
                error!("Error extrayendo texto de {}: {}", filename, e);
                report.failures.push(format!("Failed to process {filename}: {e}"));
            }
        }
    }

    report.text = report.text.to_lowercase();
    report
}

/// Troceador recursivo por caracteres: prueba los separadores en orden y
/// sólo baja al siguiente cuando un fragmento sigue siendo demasiado largo.
/// Las longitudes se miden en caracteres.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
            separators: ["\n\n", "\n", " ", ""].iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let mut separator = "";
        let mut remaining: &[String] = &[];
        for (i, candidate) in separators.iter().enumerate() {
            if candidate.is_empty() {
                break;
            }
            if text.contains(candidate.as_str()) {
                separator = candidate;
                remaining = &separators[i + 1..];
                break;
            }
        }

        let mut chunks = Vec::new();
        let mut pending: Vec<&str> = Vec::new();
        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) < self.chunk_size {
                pending.push(piece);
                continue;
            }
            if !pending.is_empty() {
                chunks.extend(self.merge(&pending));
                pending.clear();
            }
            if remaining.is_empty() {
                chunks.push(piece.to_string());
            } else {
                chunks.extend(self.split_recursive(piece, remaining));
            }
        }
        if !pending.is_empty() {
            chunks.extend(self.merge(&pending));
        }
        chunks
    }

    /// Junta fragmentos pequeños hasta `chunk_size`, arrastrando al siguiente
    /// chunk como mucho `chunk_overlap` caracteres del anterior.
    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !window.is_empty() {
                push_trimmed(&mut chunks, &window);
                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    match window.pop_front() {
                        Some(front) => total -= char_len(front),
                        None => break,
                    }
                }
            }
            window.push_back(piece);
            total += len;
        }
        push_trimmed(&mut chunks, &window);
        chunks
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn push_trimmed(chunks: &mut Vec<String>, window: &VecDeque<&str>) {
    let joined: String = window.iter().copied().collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

/// Parte `text` dejando cada separador al principio del trozo siguiente.
/// Con separador vacío devuelve un trozo por carácter.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text.char_indices().map(|(i, c)| &text[i..i + c.len_utf8()]).collect();
    }
    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(separator) {
        if idx > start {
            pieces.push(&text[start..idx]);
        }
        start = idx;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces.retain(|p| !p.is_empty());
    pieces
}

/// Dependencias de la ingesta.
pub struct Ingestor<'a> {
    pub documents: &'a DocumentStore,
    pub extractor: Arc<dyn TextExtractor>,
    pub splitter: &'a TextSplitter,
    pub embedder: &'a dyn Embedder,
    pub index_store: &'a IndexStore,
}

impl Ingestor<'_> {
    /// Procesa los ficheros seleccionados y sustituye el índice de `namespace`.
    /// Si no se obtiene texto, no se escribe nada.
    pub async fn process(
        &self,
        namespace: &str,
        filenames: &[String],
        status_arc: Arc<Mutex<Status>>,
    ) -> Result<IngestionSummary, IngestError> {
        if filenames.is_empty() {
            return Err(IngestError::NoSelection);
        }

        set_status(&status_arc, format!("Extrayendo texto de {} PDF(s)...", filenames.len()), 0.1);
        let documents = self.documents.clone();
        let extractor = self.extractor.clone();
        let selected = filenames.to_vec();
        let report = tokio::task::spawn_blocking(move || extract_documents(&documents, extractor.as_ref(), &selected))
            .await
            .map_err(|e| anyhow!("La tarea de extracción terminó de forma anómala: {e}"))?;

        if report.text.trim().is_empty() {
            warn!("Sin texto extraíble en {:?}", filenames);
            return Err(IngestError::NoExtractableText {
                failures: report.failures,
            });
        }

        set_status(&status_arc, "Troceando texto...".to_string(), 0.3);
        let texts = self.splitter.split(&report.text);
        info!("{} caracteres troceados en {} chunks.", report.text.len(), texts.len());

        set_status(&status_arc, format!("Calculando embeddings de {} chunks...", texts.len()), 0.5);
        let vectors = self.embedder.embed_texts(texts.clone()).await?;
        if vectors.len() != texts.len() {
            return Err(anyhow!(
                "Número de embeddings ({}) distinto al número de chunks ({})",
                vectors.len(),
                texts.len()
            )
            .into());
        }

        let artifact = IndexArtifact {
            embedding_model: self.embedder.model_name().to_string(),
            created_at: Utc::now(),
            sources: report.extracted.clone(),
            chunks: texts
                .into_iter()
                .zip(vectors)
                .map(|(text, embedding)| ChunkDoc { text, embedding })
                .collect(),
        };

        set_status(&status_arc, "Guardando índice...".to_string(), 0.9);
        let handle = self
            .index_store
            .write(namespace, &artifact)
            .await
            .map_err(anyhow::Error::from)?;

        Ok(IngestionSummary {
            files_ingested: report.extracted,
            failures: report.failures,
            chunks_created: artifact.chunks.len(),
            handle: Some(handle),
        })
    }
}

fn set_status(status_arc: &Arc<Mutex<Status>>, message: String, progress: f32) {
    if let Ok(mut status) = status_arc.lock() {
        status.message = message;
        status.progress = progress;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::vector_store::tests::KeywordEmbedder;
    use std::collections::HashMap;

    /// Extractor de pruebas: texto fijo por nombre de fichero; los nombres
    /// ausentes fallan como un PDF corrupto.
    pub(crate) struct FakeExtractor(pub HashMap<String, String>);

    impl TextExtractor for FakeExtractor {
        fn extract(&self, path: &Path) -> Result<String> {
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            self.0
                .get(&name)
                .cloned()
                .ok_or_else(|| anyhow!("invalid PDF structure"))
        }
    }

    /// Extractor que entra en pánico con `bad.pdf`, como `pdf-extract` con
    /// una fuente rota.
    struct PanickyExtractor(FakeExtractor);

    impl TextExtractor for PanickyExtractor {
        fn extract(&self, path: &Path) -> Result<String> {
            if path.ends_with("bad.pdf") {
                panic!("missing BaseFont");
            }
            self.0.extract(path)
        }
    }

    fn store_with(dir: &Path, names: &[&str]) -> DocumentStore {
        let store = DocumentStore::new(dir, 1024 * 1024);
        for name in names {
            std::fs::write(dir.join(name), b"%PDF-1.4").unwrap();
        }
        store
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let splitter = TextSplitter::new(100, 10);
        assert_eq!(splitter.split("hello world"), vec!["hello world"]);
        assert!(splitter.split("   \n\n  ").is_empty());
    }

    #[test]
    fn chunks_respect_size_and_overlap() {
        let text = (0..200).map(|i| format!("w{i:03}")).collect::<Vec<_>>().join(" ");
        let splitter = TextSplitter::new(50, 10);
        let chunks = splitter.split(&text);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 50, "chunk too long: {chunk}");
        }
        // El final de un chunk reaparece al principio del siguiente.
        let first_of_next = chunks[1].split_whitespace().next().unwrap();
        let last_word = chunks[0].split_whitespace().last().unwrap();
        assert!(chunks[0].contains(first_of_next));
        assert!(chunks[1].contains(last_word));
        assert!(chunks.last().unwrap().ends_with("w199"));
    }

    #[test]
    fn paragraphs_are_preferred_split_points() {
        let para = "a".repeat(30);
        let text = format!("{para}\n\n{para}\n\n{para}");
        let chunks = TextSplitter::new(70, 0).split(&text);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], format!("{para}\n\n{para}"));
        assert_eq!(chunks[1], para);
    }

    #[test]
    fn unbroken_text_falls_back_to_characters() {
        let text = "x".repeat(25);
        let chunks = TextSplitter::new(10, 2).split(&text);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        assert_eq!(chunks[0].len(), 10);
    }

    #[test]
    fn failing_file_is_reported_and_others_continue() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(dir.path(), &["good.pdf", "bad.pdf"]);
        let extractor = FakeExtractor(HashMap::from([("good.pdf".to_string(), "CLAT Eligibility".to_string())]));

        let report = extract_documents(
            &store,
            &extractor,
            &["bad.pdf".to_string(), "good.pdf".to_string(), "missing.pdf".to_string()],
        );
        assert_eq!(report.text, "clat eligibility");
        assert_eq!(report.extracted, vec!["good.pdf"]);
        assert_eq!(report.failures.len(), 2);
        assert!(report.failures[0].starts_with("Failed to process bad.pdf"));
    }

    #[tokio::test]
    async fn extractor_panic_only_fails_that_file() {
        let dir = tempfile::tempdir().unwrap();
        let docs = store_with(dir.path(), &["bad.pdf", "good.pdf"]);
        let index_store = IndexStore::new(dir.path().join("index"));
        let splitter = TextSplitter::new(100, 10);
        let ingestor = Ingestor {
            documents: &docs,
            extractor: Arc::new(PanickyExtractor(FakeExtractor(HashMap::from([(
                "good.pdf".to_string(),
                "CLAT eligibility".to_string(),
            )])))),
            splitter: &splitter,
            embedder: &KeywordEmbedder,
            index_store: &index_store,
        };
        let status = Arc::new(Mutex::new(Status::default()));

        let summary = ingestor
            .process("s", &["bad.pdf".to_string(), "good.pdf".to_string()], status)
            .await
            .unwrap();
        assert_eq!(summary.files_ingested, vec!["good.pdf"]);
        assert_eq!(summary.failures.len(), 1);
        assert!(summary.failures[0].starts_with("Failed to process bad.pdf"));
        assert!(summary.failures[0].contains("missing BaseFont"));

        let artifact = index_store.load(&summary.handle.unwrap()).await.unwrap();
        assert_eq!(artifact.chunks[0].text, "clat eligibility");
    }

    #[tokio::test]
    async fn empty_selection_and_empty_text_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let docs = store_with(dir.path(), &["blank.pdf"]);
        let index_store = IndexStore::new(dir.path().join("index"));
        let splitter = TextSplitter::new(100, 10);
        let ingestor = Ingestor {
            documents: &docs,
            extractor: Arc::new(FakeExtractor(HashMap::from([("blank.pdf".to_string(), "  \n".to_string())]))),
            splitter: &splitter,
            embedder: &KeywordEmbedder,
            index_store: &index_store,
        };
        let status = Arc::new(Mutex::new(Status::default()));

        let err = ingestor.process("s", &[], status.clone()).await.unwrap_err();
        assert!(matches!(err, IngestError::NoSelection));

        let err = ingestor.process("s", &["blank.pdf".to_string()], status).await.unwrap_err();
        assert_eq!(err.to_string(), "No extractable text found in the selected PDF(s).");
        assert!(index_store.current("s").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn processing_writes_a_new_index_version() {
        let dir = tempfile::tempdir().unwrap();
        let docs = store_with(dir.path(), &["clat.pdf"]);
        let index_store = IndexStore::new(dir.path().join("index"));
        let splitter = TextSplitter::new(10_000, 1_000);
        let ingestor = Ingestor {
            documents: &docs,
            extractor: Arc::new(FakeExtractor(HashMap::from([(
                "clat.pdf".to_string(),
                "CLAT eligibility criteria: 10+2 with 45% marks.".to_string(),
            )]))),
            splitter: &splitter,
            embedder: &KeywordEmbedder,
            index_store: &index_store,
        };
        let status = Arc::new(Mutex::new(Status::default()));

        let summary = ingestor.process("s", &["clat.pdf".to_string()], status.clone()).await.unwrap();
        assert_eq!(summary.chunks_created, 1);
        assert_eq!(summary.handle.as_ref().unwrap().version, 1);
        assert_eq!(summary.to_string(), "1 file(s) indexed, 0 failed, 1 chunks.");

        let again = ingestor.process("s", &["clat.pdf".to_string()], status).await.unwrap();
        assert_eq!(again.handle.unwrap().version, 2);

        let artifact = index_store.load(&summary.handle.unwrap()).await.unwrap();
        assert_eq!(artifact.chunks[0].text, "clat eligibility criteria: 10+2 with 45% marks.");
        assert_eq!(artifact.embedding_model, "keyword-test");
    }
}
