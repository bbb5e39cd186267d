//! Application state shared across handlers.

use crate::authz::AuthorizationVerifier;
use crate::blocking::BlockingPool;
use crate::gate::AccessGate;
use crate::librarian::Librarian;
use crate::migration::MigrationSweep;
use librarian_core::config::AppConfig;
use librarian_metadata::MetadataStore;
use librarian_storage::StorageRouter;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub librarian: Librarian,
    pub storage: Arc<StorageRouter>,
    pub metadata: Arc<dyn MetadataStore>,
}

impl AppState {
    /// Wire the service together from already-connected backends.
    pub fn new(
        config: AppConfig,
        storage: Arc<StorageRouter>,
        metadata: Arc<dyn MetadataStore>,
        verifier: Arc<dyn AuthorizationVerifier>,
    ) -> Self {
        let gate = AccessGate::new(verifier, config.authorization.timeout());
        let librarian = Librarian::new(
            Arc::clone(&metadata),
            Arc::clone(&storage),
            gate,
            BlockingPool::new(config.server.blocking_threads),
            config.server.max_upload_size,
        );
        Self {
            config: Arc::new(config),
            librarian,
            storage,
            metadata,
        }
    }

    /// A migration sweep over this state's ledger and tiers.
    pub fn migration_sweep(&self) -> MigrationSweep {
        MigrationSweep::new(
            Arc::clone(&self.metadata),
            Arc::clone(&self.storage),
            self.config.migration.clone(),
        )
    }
}
