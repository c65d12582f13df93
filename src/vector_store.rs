//! Índice vectorial local, versionado y aislado por espacio de nombres.
//!
//! Disposición en disco:
//!   - `<raíz>/<namespace>/v<N>/index.json`: artefacto completo (chunks + embeddings).
//!   - `<raíz>/<namespace>/CURRENT`: número de la versión vigente.
//!
//! Cada reprocesado escribe una versión nueva y después mueve `CURRENT`; un
//! lector que ya tiene la versión N no ve nunca la N+1 a medio escribir.
//! Se conservan la vigente y la anterior: un lector con una versión más
//! antigua obtiene `IndexError::Missing`.
//!
//! API pública:
//!   - `IndexStore::{write, current, load}`
//!   - `search_top_chunks(&IndexStore, &IndexHandle, &dyn Embedder, &str, usize)`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rig::embeddings::{distance::VectorDistance, Embedding};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::documents::sanitize_filename;
use crate::llm::Embedder;

const ARTIFACT_FILE: &str = "index.json";
const CURRENT_FILE: &str = "CURRENT";

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt index artifact: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("no index has been built for namespace '{0}'")]
    Missing(String),
    #[error("embedding request failed: {0}")]
    Embedding(anyhow::Error),
    #[error("index was built with '{built}' but the current embedding model is '{current}'; reprocess the PDFs")]
    ModelMismatch { built: String, current: String },
}

/// Documento mínimo que representa un chunk con texto y vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkDoc {
    pub text: String,
    pub embedding: Vec<f64>,
}

/// Artefacto persistido: se sustituye entero en cada reprocesado.
/// `embedding_model` se comprueba al consultar; `created_at` y `sources`
/// sólo se registran en el log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexArtifact {
    pub embedding_model: String,
    pub created_at: DateTime<Utc>,
    pub sources: Vec<String>,
    pub chunks: Vec<ChunkDoc>,
}

/// Referencia a una versión concreta del índice de un espacio de nombres.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexHandle {
    pub namespace: String,
    pub version: u64,
    pub dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct IndexStore {
    root: PathBuf,
}

impl IndexStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.root.join(sanitize_filename(namespace))
    }

    fn handle(&self, namespace: &str, version: u64) -> IndexHandle {
        IndexHandle {
            namespace: namespace.to_string(),
            version,
            dir: self.namespace_dir(namespace).join(format!("v{version}")),
        }
    }

    /// Versión vigente de un espacio de nombres, si existe.
    pub async fn current(&self, namespace: &str) -> Result<Option<IndexHandle>, IndexError> {
        let pointer = self.namespace_dir(namespace).join(CURRENT_FILE);
        match tokio::fs::read_to_string(&pointer).await {
            Ok(raw) => match raw.trim().parse::<u64>() {
                Ok(version) => Ok(Some(self.handle(namespace, version))),
                Err(_) => {
                    warn!("Puntero CURRENT ilegible en {}: '{}'", pointer.display(), raw.trim());
                    Ok(None)
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Escribe una versión nueva y la marca como vigente (la última escritura gana).
    pub async fn write(&self, namespace: &str, artifact: &IndexArtifact) -> Result<IndexHandle, IndexError> {
        let ns_dir = self.namespace_dir(namespace);
        tokio::fs::create_dir_all(&ns_dir).await?;

        let mut version = self.current(namespace).await?.map(|h| h.version + 1).unwrap_or(1);
        // `create_dir` falla si otra escritura ya reservó esa versión.
        let handle = loop {
            let candidate = self.handle(namespace, version);
            match tokio::fs::create_dir(&candidate.dir).await {
                Ok(()) => break candidate,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => version += 1,
                Err(e) => return Err(e.into()),
            }
        };

        let json = serde_json::to_vec(artifact)?;
        tokio::fs::write(handle.dir.join(ARTIFACT_FILE), json).await?;

        let tmp = ns_dir.join(format!("{CURRENT_FILE}.{version}.tmp"));
        tokio::fs::write(&tmp, version.to_string()).await?;
        tokio::fs::rename(&tmp, ns_dir.join(CURRENT_FILE)).await?;

        info!(
            "Índice '{}' v{} escrito con {} chunks.",
            handle.namespace,
            handle.version,
            artifact.chunks.len()
        );
        self.prune(&ns_dir, version).await;
        Ok(handle)
    }

    /// Borra versiones anteriores a la inmediatamente previa a `keep`.
    async fn prune(&self, ns_dir: &Path, keep: u64) {
        let mut entries = match tokio::fs::read_dir(ns_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("No se pudo listar {}: {}", ns_dir.display(), e);
                return;
            }
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(version) = name.strip_prefix('v').and_then(|v| v.parse::<u64>().ok()) else {
                continue;
            };
            if version + 1 < keep {
                if let Err(e) = tokio::fs::remove_dir_all(entry.path()).await {
                    warn!("No se pudo borrar la versión antigua {}: {}", entry.path().display(), e);
                } else {
                    debug!("Versión antigua borrada: {}", entry.path().display());
                }
            }
        }
    }

    pub async fn load(&self, handle: &IndexHandle) -> Result<IndexArtifact, IndexError> {
        let path = handle.dir.join(ARTIFACT_FILE);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(IndexError::Missing(handle.namespace.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&raw)?)
    }
}

/// Realiza una búsqueda vectorial sobre los embeddings del artefacto
/// referenciado por `handle`. Devuelve `(score, chunk)` de mayor a menor score.
pub async fn search_top_chunks(
    store: &IndexStore,
    handle: &IndexHandle,
    embedder: &dyn Embedder,
    query_text: &str,
    top_k: usize,
) -> Result<Vec<(f64, ChunkDoc)>, IndexError> {
    let artifact = store.load(handle).await?;
    if artifact.embedding_model != embedder.model_name() {
        return Err(IndexError::ModelMismatch {
            built: artifact.embedding_model,
            current: embedder.model_name().to_string(),
        });
    }
    debug!(
        "Índice '{}' v{} creado {} a partir de {:?}",
        handle.namespace, handle.version, artifact.created_at, artifact.sources
    );
    if artifact.chunks.is_empty() || top_k == 0 {
        return Ok(Vec::new());
    }

    // 1) Embedding de la query
    let query_vec = embedder
        .embed_texts(vec![query_text.to_string()])
        .await
        .map_err(IndexError::Embedding)?
        .into_iter()
        .next()
        .ok_or_else(|| IndexError::Embedding(anyhow::anyhow!("No se pudo generar embedding de la query")))?;
    let query_embedding = Embedding {
        document: query_text.to_string(),
        vec: query_vec,
    };

    // 2) Similitud coseno contra cada chunk
    let mut scored: Vec<(f64, ChunkDoc)> = artifact
        .chunks
        .into_iter()
        .map(|chunk| {
            let candidate = Embedding {
                document: String::new(),
                vec: chunk.embedding.clone(),
            };
            let score = query_embedding.cosine_similarity(&candidate, false);
            (if score.is_nan() { f64::MIN } else { score }, chunk)
        })
        .collect();

    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.truncate(top_k);
    Ok(scored)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Embedder determinista: una dimensión por palabra del vocabulario más
    /// un sesgo constante para no producir vectores nulos.
    pub(crate) struct KeywordEmbedder;

    const VOCAB: &[&str] = &["clat", "eligibility", "contract", "tort", "weather", "syllabus"];

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        fn model_name(&self) -> &str {
            "keyword-test"
        }

        async fn embed_texts(&self, texts: Vec<String>) -> anyhow::Result<Vec<Vec<f64>>> {
            Ok(texts
                .iter()
                .map(|text| {
                    let text = text.to_lowercase();
                    let mut v: Vec<f64> = VOCAB.iter().map(|w| text.matches(w).count() as f64).collect();
                    v.push(0.1);
                    v
                })
                .collect())
        }
    }

    pub(crate) async fn artifact_for(texts: &[&str]) -> IndexArtifact {
        let owned: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        let vectors = KeywordEmbedder.embed_texts(owned.clone()).await.unwrap();
        IndexArtifact {
            embedding_model: "keyword-test".to_string(),
            created_at: Utc::now(),
            sources: vec!["test.pdf".to_string()],
            chunks: owned
                .into_iter()
                .zip(vectors)
                .map(|(text, embedding)| ChunkDoc { text, embedding })
                .collect(),
        }
    }

    #[tokio::test]
    async fn writes_versions_and_moves_current_pointer() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        assert!(store.current("s1").await.unwrap().is_none());

        let first = store.write("s1", &artifact_for(&["clat"]).await).await.unwrap();
        let second = store.write("s1", &artifact_for(&["tort"]).await).await.unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_eq!(store.current("s1").await.unwrap(), Some(second.clone()));

        // La versión anterior sigue legible para quien ya la tenía.
        assert_eq!(store.load(&first).await.unwrap().chunks[0].text, "clat");
        assert_eq!(store.load(&second).await.unwrap().chunks[0].text, "tort");
    }

    #[tokio::test]
    async fn old_versions_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        let first = store.write("s", &artifact_for(&["a"]).await).await.unwrap();
        store.write("s", &artifact_for(&["b"]).await).await.unwrap();
        store.write("s", &artifact_for(&["c"]).await).await.unwrap();
        assert!(matches!(store.load(&first).await, Err(IndexError::Missing(_))));
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        store.write("alice", &artifact_for(&["clat eligibility"]).await).await.unwrap();
        assert!(store.current("bob").await.unwrap().is_none());

        let bob = store.write("bob", &artifact_for(&["tort law"]).await).await.unwrap();
        let alice = store.current("alice").await.unwrap().unwrap();
        assert_eq!(alice.version, 1);
        assert_eq!(bob.version, 1);
        assert_ne!(alice.dir, bob.dir);
        assert_eq!(store.load(&alice).await.unwrap().chunks[0].text, "clat eligibility");
    }

    #[tokio::test]
    async fn search_ranks_by_similarity() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        let artifact = artifact_for(&[
            "the weather section",
            "clat eligibility criteria: 45% marks",
            "contract and tort basics",
        ])
        .await;
        let handle = store.write("s", &artifact).await.unwrap();

        let results = search_top_chunks(&store, &handle, &KeywordEmbedder, "what is the clat eligibility?", 2)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].1.text, "clat eligibility criteria: 45% marks");
        assert!(results[0].0 >= results[1].0);
    }

    #[tokio::test]
    async fn index_from_another_embedding_model_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        let mut artifact = artifact_for(&["clat"]).await;
        artifact.embedding_model = "text-embedding-ada-002".to_string();
        let handle = store.write("s", &artifact).await.unwrap();

        let err = search_top_chunks(&store, &handle, &KeywordEmbedder, "clat", 4).await.unwrap_err();
        assert!(matches!(err, IndexError::ModelMismatch { ref built, .. } if built == "text-embedding-ada-002"));
    }

    #[tokio::test]
    async fn corrupt_artifact_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        let handle = store.write("s", &artifact_for(&["clat"]).await).await.unwrap();
        std::fs::write(handle.dir.join(ARTIFACT_FILE), b"{not json").unwrap();

        let err = search_top_chunks(&store, &handle, &KeywordEmbedder, "clat", 4).await.unwrap_err();
        assert!(matches!(err, IndexError::Corrupt(_)));
    }
}
