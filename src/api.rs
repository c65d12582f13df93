use axum::{
    extract::{DefaultBodyLimit, Json, Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    app_state::{AppState, Status},
    ingest::{IngestError, Ingestor},
    models::{DocumentRecord, Message, Route},
    rag::AskError,
};

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct AskPayload {
    question: String,
}

#[derive(Serialize)]
pub struct AskResponse {
    reply: String,
    route: Route,
    notices: Vec<String>,
}

#[derive(Deserialize)]
pub struct ProcessPayload {
    #[serde(default)]
    filenames: Vec<String>,
}

#[derive(Serialize)]
pub struct ProcessResponse {
    message: String,
    indexed: Vec<String>,
    failures: Vec<String>,
    chunks: usize,
    index_version: Option<u64>,
}

#[derive(Serialize)]
pub struct TranscriptResponse {
    session_id: Uuid,
    messages: Vec<Message>,
    index_ready: bool,
    index_version: Option<u64>,
}

#[derive(Serialize)]
pub struct UploadResponse {
    saved: Vec<DocumentRecord>,
    errors: Vec<String>,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/sessions", post(create_session_handler))
        .route("/api/sessions/:id/messages", get(transcript_handler))
        .route("/api/sessions/:id/ask", post(ask_handler))
        .route("/api/sessions/:id/process", post(process_handler))
        // Sin límite global: el handler lee por trozos y corta cada fichero
        // al superar el máximo por PDF.
        .route(
            "/api/documents",
            get(list_documents_handler)
                .post(upload_handler)
                .layer(DefaultBodyLimit::disable()),
        )
        .route("/api/status", get(status_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn create_session_handler(State(state): State<AppState>) -> impl IntoResponse {
    let id = state.sessions.create();
    (StatusCode::CREATED, Json(json!({ "session_id": id })))
}

#[axum::debug_handler]
async fn transcript_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TranscriptResponse>, ApiError> {
    let session = state
        .sessions
        .get(id)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("Unknown session: {id}")))?;

    Ok(Json(TranscriptResponse {
        session_id: session.id,
        index_ready: session.index_ready(),
        index_version: session.index.as_ref().map(|h| h.version),
        messages: session.messages,
    }))
}

#[axum::debug_handler]
async fn ask_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AskPayload>,
) -> Result<Json<AskResponse>, ApiError> {
    match state.engine.ask(&state.sessions, id, &payload.question).await {
        Ok(outcome) => Ok(Json(AskResponse {
            reply: outcome.reply,
            route: outcome.route,
            notices: outcome.notices,
        })),
        Err(e @ AskError::Invalid(_)) => Err(api_error(StatusCode::BAD_REQUEST, e.to_string())),
        Err(e @ AskError::UnknownSession(_)) => Err(api_error(StatusCode::NOT_FOUND, e.to_string())),
        Err(e @ AskError::Composer(_)) => {
            error!("Error del LLM en la sesión {}: {}", id, e);
            Err(api_error(StatusCode::BAD_GATEWAY, e.to_string()))
        }
    }
}

#[axum::debug_handler]
async fn process_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ProcessPayload>,
) -> Result<Json<ProcessResponse>, ApiError> {
    let session = state
        .sessions
        .get(id)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("Unknown session: {id}")))?;

    state.status.lock().unwrap().begin_job("Processing selected PDFs...");

    let ingestor = Ingestor {
        documents: &state.documents,
        extractor: state.extractor.clone(),
        splitter: state.splitter.as_ref(),
        embedder: state.engine.embedder.as_ref(),
        index_store: &state.engine.index_store,
    };
    let result = ingestor
        .process(&session.namespace(), &payload.filenames, state.status.clone())
        .await;

    let mut status = state.status.lock().unwrap();

    match result {
        Ok(summary) => {
            status.finish_job(format!("PDFs processed and indexed! {summary}"));
            let index_version = summary.handle.as_ref().map(|h| h.version);
            if let Some(handle) = summary.handle {
                state.sessions.set_index(id, handle);
            }
            info!("Sesión {}: {}", id, summary_line(&summary.files_ingested, summary.chunks_created));
            Ok(Json(ProcessResponse {
                message: "PDFs processed and indexed!".to_string(),
                indexed: summary.files_ingested,
                failures: summary.failures,
                chunks: summary.chunks_created,
                index_version,
            }))
        }
        Err(err) => {
            status.finish_job(err.to_string());
            match err {
                IngestError::NoSelection => Err(api_error(StatusCode::BAD_REQUEST, err.to_string())),
                IngestError::NoExtractableText { ref failures } => Err((
                    StatusCode::UNPROCESSABLE_ENTITY,
                    Json(json!({ "error": err.to_string(), "failures": failures })),
                )),
                IngestError::Other(ref e) => {
                    error!("Error de ingesta en la sesión {}: {:#}", id, e);
                    Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))
                }
            }
        }
    }
}

fn summary_line(files: &[String], chunks: usize) -> String {
    format!("{} fichero(s) indexados en {} chunks", files.len(), chunks)
}

#[axum::debug_handler]
async fn list_documents_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<DocumentRecord>>, ApiError> {
    state
        .documents
        .list()
        .map(Json)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

#[axum::debug_handler]
async fn upload_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut saved = Vec::new();
    let mut errors = Vec::new();

    let max_bytes = state.config.max_pdf_bytes();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Invalid upload: {e}")))?
    {
        let Some(name) = field.file_name().map(str::to_owned) else {
            continue;
        };

        // Se consume el campo entero pero sólo se guarda hasta el límite.
        let mut bytes = Vec::new();
        let mut received: u64 = 0;
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Invalid upload: {e}")))?
        {
            received += chunk.len() as u64;
            if received <= max_bytes {
                bytes.extend_from_slice(&chunk);
            }
        }

        let result = match state.documents.check_size(&name, received) {
            Ok(()) => state.documents.save(&name, &bytes).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(record) => saved.push(record),
            Err(e) => {
                warn!("Subida rechazada ({}): {}", name, e);
                errors.push(e.to_string());
            }
        }
    }

    Ok(Json(UploadResponse { saved, errors }))
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    Json(state.status.lock().unwrap().clone())
}

// --- Handler de Apagado ---

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Some(sender) = state.shutdown_sender.lock().unwrap().take() {
        let _ = sender.send(());
    }
    StatusCode::OK
}
