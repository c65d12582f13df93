use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::{
    config::AppConfig,
    documents::DocumentStore,
    ingest::{TextExtractor, TextSplitter},
    rag::RagEngine,
    session::SessionRegistry,
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub documents: DocumentStore,
    pub sessions: SessionRegistry,
    pub engine: Arc<RagEngine>,
    pub extractor: Arc<dyn TextExtractor>,
    pub splitter: Arc<TextSplitter>,
    pub status: Arc<Mutex<Status>>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

/// Estado global del servidor (no por sesión). Con varios procesados a la
/// vez, `is_busy` sigue activo hasta que termina el último.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Status {
    pub is_busy: bool,
    pub message: String,
    pub progress: f32, // Valor entre 0.0 y 1.0
    pub active_jobs: usize,
}

impl Status {
    pub fn begin_job(&mut self, message: impl Into<String>) {
        self.active_jobs += 1;
        self.is_busy = true;
        self.message = message.into();
        self.progress = 0.0;
    }

    pub fn finish_job(&mut self, message: impl Into<String>) {
        self.active_jobs = self.active_jobs.saturating_sub(1);
        self.is_busy = self.active_jobs > 0;
        self.message = message.into();
        self.progress = 0.0;
    }
}
