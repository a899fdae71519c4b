/*
 * Dedupe Engine - control plane for near-duplicate document detection
 *
 * Sits alongside a paperless-ngx server and owns the long-running work:
 *
 * - Sync engine: incremental pull of metadata + OCR with change detection
 * - Analysis coordinator: six-phase MinHash/LSH similarity pipeline
 * - Batch orchestrator: cancellable bulk resolve/review/delete operations
 * - Event bus: typed progress fanout for all of the above
 * - AI port: injected metadata-suggestion provider with an apply path
 *
 * The HTTP/RPC surface is a thin adapter over `DedupeEngine`; nothing in
 * this crate binds a socket.
 */

pub mod ai;
pub mod analysis;
pub mod batch;
pub mod error;
pub mod events;
pub mod sync;
pub mod upstream;

use std::sync::Arc;

use parking_lot::RwLock;

use dedupe_core::DedupeConfig;
use dedupe_storage::DedupeStore;

pub use ai::{AiJobRunner, SuggestionProvider};
pub use analysis::AnalysisCoordinator;
pub use batch::{BatchCommand, BatchOrchestrator};
pub use error::{EngineError, Result};
pub use events::{
    AnalysisOutcome, AnalysisProgress, BatchProgress, Event, EventBody, EventBus, EventTopic,
    Subscription, SyncProgress, SyncReport,
};
pub use sync::{SyncEngine, SyncOptions};
pub use upstream::{
    DocumentPage, DocumentPatch, HttpPaperlessClient, PaperlessClient, RetryPolicy,
    UpstreamDocument,
};

/// Process-wide configuration handle. Subsystems clone the value at phase
/// entry; writers swap it through `DedupeEngine::save_config`.
pub type SharedConfig = Arc<RwLock<DedupeConfig>>;

/// Storage key for the persisted configuration.
pub const CONFIG_SETTING_KEY: &str = "config";

/// Wires the subsystems to one store, one upstream client, and one bus.
pub struct DedupeEngine {
    store: Arc<dyn DedupeStore>,
    bus: Arc<EventBus>,
    config: SharedConfig,
    pub sync: SyncEngine,
    pub analysis: AnalysisCoordinator,
    pub batch: BatchOrchestrator,
}

impl DedupeEngine {
    pub fn new(
        store: Arc<dyn DedupeStore>,
        client: Arc<dyn PaperlessClient>,
        config: DedupeConfig,
    ) -> Result<Self> {
        config.validate()?;
        let bus = Arc::new(EventBus::new());
        let config: SharedConfig = Arc::new(RwLock::new(config));

        Ok(Self {
            sync: SyncEngine::new(store.clone(), client.clone(), bus.clone(), config.clone()),
            analysis: AnalysisCoordinator::new(store.clone(), bus.clone(), config.clone()),
            batch: BatchOrchestrator::new(store.clone(), client, bus.clone()),
            store,
            bus,
            config,
        })
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn config(&self) -> DedupeConfig {
        self.config.read().clone()
    }

    /// Load persisted configuration from the store, if any.
    pub async fn load_config(&self) -> Result<DedupeConfig> {
        if let Some(value) = self.store.get_setting(CONFIG_SETTING_KEY).await? {
            let loaded: DedupeConfig =
                serde_json::from_value(value).map_err(|e| EngineError::Internal(e.into()))?;
            loaded.validate()?;
            *self.config.write() = loaded;
        }
        Ok(self.config())
    }

    /// Validate, persist, and activate a new configuration. Invalid configs
    /// are rejected at write time and the active config is untouched.
    pub async fn save_config(&self, config: DedupeConfig) -> Result<()> {
        config.validate()?;
        let value = serde_json::to_value(&config).map_err(|e| EngineError::Internal(e.into()))?;
        self.store.put_setting(CONFIG_SETTING_KEY, &value).await?;
        *self.config.write() = config;
        Ok(())
    }
}
