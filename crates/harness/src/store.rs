use chrono::{DateTime, Duration, Utc};
use recon_core::{
    Competitor, CompetitorId, Project, ProjectId, ProjectPriority, ProjectStatus, QualityMetadata,
    ReportId, ReportSchedule, ReportStatus, ReportSummary, ReportVersion, ScheduleId, VersionId,
};
use recon_engine::{FileBackupSink, ReconcileConfig, ReconcileEngine};
use recon_storage::{SqliteStorage, Storage, StorageError};
use tempfile::TempDir;

/// Fixed epoch for fixtures, millisecond-aligned so stored timestamps compare equal.
pub const BASE_MILLIS: i64 = 1_700_000_000_000;

/// In-memory store with seeding shortcuts. All times are offsets from a fixed base.
pub struct TestStore {
    pub storage: SqliteStorage,
    base: DateTime<Utc>,
}

impl TestStore {
    pub fn new() -> Result<Self, StorageError> {
        let base = DateTime::from_timestamp_millis(BASE_MILLIS)
            .ok_or_else(|| StorageError::Serialization("invalid fixture base time".into()))?;
        Ok(Self {
            storage: SqliteStorage::open_in_memory()?,
            base,
        })
    }

    pub fn at(&self, offset: Duration) -> DateTime<Utc> {
        self.base + offset
    }

    pub fn competitor(&self, name: &str) -> Result<CompetitorId, StorageError> {
        let id = CompetitorId::new();
        self.storage.insert_competitor(&Competitor {
            id,
            name: name.to_string(),
        })?;
        Ok(id)
    }

    /// Project created and updated at the base time.
    pub fn project(
        &self,
        name: &str,
        status: ProjectStatus,
        priority: ProjectPriority,
        competitors: &[CompetitorId],
    ) -> Result<ProjectId, StorageError> {
        self.project_at(name, status, priority, competitors, Duration::zero(), Duration::zero())
    }

    pub fn project_at(
        &self,
        name: &str,
        status: ProjectStatus,
        priority: ProjectPriority,
        competitors: &[CompetitorId],
        created: Duration,
        updated: Duration,
    ) -> Result<ProjectId, StorageError> {
        let id = ProjectId::new();
        self.storage.insert_project(&Project {
            id,
            name: name.to_string(),
            status,
            priority,
            created_at: self.at(created),
            updated_at: self.at(updated),
            competitor_ids: competitors.to_vec(),
        })?;
        Ok(id)
    }

    /// Report created at the base time.
    pub fn report(
        &self,
        name: &str,
        status: ReportStatus,
        competitor: Option<CompetitorId>,
        project: Option<ProjectId>,
    ) -> Result<ReportId, StorageError> {
        self.report_at(name, status, competitor, project, Duration::zero())
    }

    pub fn report_at(
        &self,
        name: &str,
        status: ReportStatus,
        competitor: Option<CompetitorId>,
        project: Option<ProjectId>,
        created: Duration,
    ) -> Result<ReportId, StorageError> {
        let id = ReportId::new();
        self.storage.insert_report(&ReportSummary {
            id,
            name: name.to_string(),
            status,
            competitor_id: competitor,
            project_id: project,
            created_at: self.at(created),
            updated_at: self.at(created),
        })?;
        Ok(id)
    }

    pub fn version(
        &self,
        report_id: ReportId,
        version: u32,
        content: Option<serde_json::Value>,
    ) -> Result<VersionId, StorageError> {
        let id = VersionId::new();
        self.storage.insert_version(&ReportVersion {
            id,
            report_id,
            version,
            content,
            created_at: self.base,
        })?;
        Ok(id)
    }

    pub fn quality(&self, report_id: ReportId, completeness_score: u8) -> Result<(), StorageError> {
        self.storage.insert_quality(&QualityMetadata {
            report_id,
            completeness_score,
            freshness: "current".to_string(),
            snapshot_count: 4,
            captured_at: self.base,
        })
    }

    pub fn schedule(
        &self,
        report_id: ReportId,
        frequency: &str,
    ) -> Result<ScheduleId, StorageError> {
        let id = ScheduleId::new();
        self.storage.insert_schedule(&ReportSchedule {
            id,
            report_id,
            frequency: frequency.to_string(),
            next_run_at: Some(self.at(Duration::days(7))),
            enabled: true,
        })?;
        Ok(id)
    }

    pub fn report_project(&self, report_id: ReportId) -> Result<Option<ProjectId>, StorageError> {
        Ok(self.storage.get_report(report_id)?.and_then(|r| r.project_id))
    }

    pub fn into_storage(self) -> SqliteStorage {
        self.storage
    }

    /// Engine over this store writing backups into a fresh temp directory.
    pub fn into_engine(
        self,
        config: ReconcileConfig,
    ) -> Result<(ReconcileEngine<SqliteStorage>, TempDir), std::io::Error> {
        let dir = tempfile::tempdir()?;
        let engine = ReconcileEngine::new(self.storage, config)
            .with_sink(Box::new(FileBackupSink::new(dir.path())));
        Ok((engine, dir))
    }
}
