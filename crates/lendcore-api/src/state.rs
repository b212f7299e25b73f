//! Application state wiring all services together.
//!
//! Core services are generic over the storage and collaborator traits;
//! `AppState` pins them to the concrete file/HTTP implementations from
//! `lendcore-infra`. This is the composition root: nothing else in the
//! codebase constructs services or holds globals.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use lendcore_core::agent::engine::EngineConfig;
use lendcore_core::agent::master::MasterAgent;
use lendcore_core::errors::ErrorReporter;
use lendcore_core::session::SessionManager;
use lendcore_infra::context_store::FileContextStore;
use lendcore_infra::document::SimulatedDocumentExtractor;
use lendcore_infra::external::ResilientGateway;
use lendcore_infra::history::FileHistoryStore;
use lendcore_infra::letter::FileLetterRenderer;
use lendcore_infra::verification::FileVerificationLedger;
use lendcore_types::config::AppConfig;

/// Concrete type aliases for the service generics pinned to infra
/// implementations.
pub type ConcreteSessionManager = SessionManager<
    FileContextStore,
    ResilientGateway,
    FileVerificationLedger,
    FileLetterRenderer,
    FileHistoryStore,
>;

pub type ConcreteMasterAgent = MasterAgent<
    FileContextStore,
    ResilientGateway,
    FileVerificationLedger,
    FileLetterRenderer,
    FileHistoryStore,
>;

/// Shared application state handed to every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub master: Arc<ConcreteMasterAgent>,
    pub gateway: Arc<ResilientGateway>,
    pub history: Arc<FileHistoryStore>,
    pub extractor: Arc<SimulatedDocumentExtractor>,
    pub uploads_dir: PathBuf,
}

impl AppState {
    /// Initialize the application state: open the stores, build the
    /// gateway, and wire the session manager and master agent.
    pub async fn init(data_dir: &Path, config: &AppConfig) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let resolve = |path: &PathBuf| {
            if path.is_absolute() {
                path.clone()
            } else {
                data_dir.join(path)
            }
        };

        let reporter = Arc::new(ErrorReporter::new());
        let store = Arc::new(FileContextStore::new(resolve(&config.context_dir)).await?);
        let ledger = Arc::new(FileVerificationLedger::new(resolve(&config.verification_store)));
        let history = Arc::new(FileHistoryStore::new(resolve(&config.history_store)));
        let uploads_dir = resolve(&config.uploads_dir);
        tokio::fs::create_dir_all(&uploads_dir).await?;
        let renderer = Arc::new(FileLetterRenderer::new(uploads_dir.clone()));
        let gateway = Arc::new(ResilientGateway::new(
            config.services.clone(),
            reporter.clone(),
        ));

        let sessions = Arc::new(SessionManager::new(
            store,
            gateway.clone(),
            ledger,
            renderer,
            history.clone(),
            reporter,
            EngineConfig::default(),
        ));
        let master = Arc::new(MasterAgent::new(sessions));

        Ok(Self {
            master,
            gateway,
            history,
            extractor: Arc::new(SimulatedDocumentExtractor),
            uploads_dir,
        })
    }

    pub fn sessions(&self) -> &Arc<ConcreteSessionManager> {
        self.master.sessions()
    }
}
