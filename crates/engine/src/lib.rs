pub mod backup;
pub mod batch;
pub mod config;
pub mod discovery;
pub mod error;
pub mod orchestrator;
pub mod resolver;
pub mod scanner;
pub mod synthesizer;
pub mod updater;

pub use backup::{
    BackupArtifact, BackupDocument, BackupFormat, BackupService, BackupSink, FileBackupSink,
};
pub use config::ReconcileConfig;
pub use discovery::{MokaProjectCache, PriorityRule, ProjectCache, ProjectDiscovery};
pub use error::EngineError;
pub use orchestrator::{
    CancelHandle, MigrationOrchestrator, RunOptions, RunReport, RunStatus, StepId, StepStatus,
};
pub use resolver::{AssociationResolver, ResolutionStats};
pub use scanner::{AnomalyScanner, ScanSummary};
pub use synthesizer::{RepairOptions, RepairSummary, ZombieRepairer};
pub use updater::{BatchUpdater, UpdateOptions, UpdateSummary};

use std::time::Duration;

use recon_storage::Storage;

/// Reconciliation engine over one store.
///
/// Owns the store, the project cache and the backup sink so that every
/// component built from it shares them.
pub struct ReconcileEngine<S: Storage> {
    storage: S,
    cache: Box<dyn ProjectCache>,
    sink: Box<dyn BackupSink>,
    config: ReconcileConfig,
    cancel: CancelHandle,
}

impl<S: Storage> ReconcileEngine<S> {
    /// Uses a moka cache and a file sink as configured.
    pub fn new(storage: S, config: ReconcileConfig) -> Self {
        let cache = MokaProjectCache::new(
            config.discovery.cache_capacity,
            Duration::from_secs(config.discovery.cache_ttl_secs),
        );
        let sink = FileBackupSink::new(config.backup.dir.clone());
        Self {
            storage,
            cache: Box::new(cache),
            sink: Box::new(sink),
            config,
            cancel: CancelHandle::new(),
        }
    }

    pub fn with_cache(mut self, cache: Box<dyn ProjectCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_sink(mut self, sink: Box<dyn BackupSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Handle that aborts the current run before its next step.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn scanner(&self) -> AnomalyScanner<'_, S> {
        AnomalyScanner::new(&self.storage)
    }

    pub fn discovery(&self) -> ProjectDiscovery<'_, S> {
        ProjectDiscovery::new(&self.storage, self.cache.as_ref())
    }

    pub fn resolver(&self) -> AssociationResolver<'_, S> {
        let rule = PriorityRule::from_name(&self.config.discovery.priority_rule);
        AssociationResolver::new(self.discovery(), &self.config.resolver, rule)
    }

    pub fn updater(&self) -> BatchUpdater<'_, S> {
        BatchUpdater::new(&self.storage)
    }

    pub fn repairer(&self) -> ZombieRepairer<'_, S> {
        ZombieRepairer::new(&self.storage)
    }

    pub fn backups(&self) -> BackupService<'_, S> {
        BackupService::new(&self.storage, self.sink.as_ref())
    }

    pub fn run(&self, options: &RunOptions) -> Result<RunReport, EngineError> {
        MigrationOrchestrator::new(
            &self.storage,
            self.cache.as_ref(),
            self.sink.as_ref(),
            &self.config,
            self.cancel.clone(),
        )
        .run(options)
    }
}
