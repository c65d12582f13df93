// Módulos de la aplicación
mod api;
mod app_state;
mod config;
mod context;
mod documents;
mod ingest;
mod intent;
mod llm;
mod models;
mod rag;
mod session;
mod vector_store;

use crate::app_state::{AppState, Status};
use axum::Router;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración y reglas de enrutado
    let cfg = config::AppConfig::from_env().expect("Error al cargar la configuración");
    let rules = intent::RoutingRules::load(cfg.routing_rules_path.as_deref())
        .expect("Error al cargar las reglas de enrutado");

    // 3. Preparar la carpeta de PDFs
    let documents = documents::DocumentStore::new(&cfg.pdf_folder, cfg.max_pdf_bytes());
    documents
        .ensure_folder()
        .await
        .expect("Error creando la carpeta de PDFs");
    info!("Carpeta de PDFs: {}", documents.root().display());

    // 4. Inicializar gestor de LLMs y motor de respuestas
    let llm_manager = Arc::new(llm::LlmManager::from_config(&cfg).expect("Error inicializando LLM Manager"));
    let engine = rag::RagEngine {
        rules: Arc::new(rules),
        embedder: llm_manager.clone(),
        composer: llm_manager,
        index_store: vector_store::IndexStore::new(&cfg.index_dir),
        settings: rag::ChatSettings::from(&cfg),
    };

    // Crear canal para la señal de apagado.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    // 5. Crear estado compartido de la aplicación
    let app_state = AppState {
        config: cfg.clone(),
        documents,
        sessions: session::SessionRegistry::default(),
        engine: Arc::new(engine),
        extractor: Arc::new(ingest::PdfExtractor),
        splitter: Arc::new(ingest::TextSplitter::new(cfg.chunk_size, cfg.chunk_overlap)),
        status: Arc::new(Mutex::new(Status {
            is_busy: false,
            message: "Servidor listo.".to_string(),
            progress: 0.0,
            active_jobs: 0,
        })),
        shutdown_sender: Arc::new(Mutex::new(Some(shutdown_tx))),
    };

    // 6. Configurar el router de la API y el servicio de ficheros estáticos
    let app = Router::new()
        .merge(api::create_router(app_state.clone()))
        .fallback_service(ServeDir::new(&cfg.frontend_dir))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 7. Iniciar el servidor
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .expect("No se pudo abrir el puerto del servidor");
    let server_url = format!("http://{}", server_addr);
    info!("🚀 Servidor escuchando en {}", &server_url);

    // Abrir el frontend en el navegador por defecto
    let has_frontend = cfg.frontend_dir.join("index.html").is_file();
    if !has_frontend {
        warn!(
            "No hay frontend en {}; sólo está disponible la API en {}/api.",
            cfg.frontend_dir.display(),
            server_url
        );
    }
    if cfg.open_browser && has_frontend && webbrowser::open(&server_url).is_err() {
        info!("No se pudo abrir el navegador. Por favor, accede a {} manualmente.", server_url);
    }

    // Configurar el apagado ordenado.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await
        .expect("Error en el servidor HTTP");

    info!("✅ Servidor cerrado correctamente.");
}
