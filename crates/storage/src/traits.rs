use chrono::{DateTime, Utc};

use recon_core::{
    Competitor, CompetitorId, Project, ProjectId, ProjectStatus, QualityMetadata, ReportId,
    ReportSchedule, ReportStatus, ReportSummary, ReportVersion, VersionId,
};

use crate::error::StorageError;

/// Report predicates. All set fields are ANDed together.
#[derive(Debug, Clone, Default)]
pub struct ReportFilter {
    pub report_id: Option<ReportId>,
    pub status: Option<ReportStatus>,
    pub competitor_id: Option<CompetitorId>,
    /// Only reports whose `project_id` is null.
    pub project_missing: bool,
    /// Only reports with zero versions.
    pub without_versions: bool,
    /// Only reports that have versions but none with content.
    pub without_content: bool,
    pub limit: Option<usize>,
}

impl ReportFilter {
    pub fn orphaned() -> Self {
        Self {
            project_missing: true,
            ..Self::default()
        }
    }

    pub fn zombies() -> Self {
        Self {
            status: Some(ReportStatus::Completed),
            without_versions: true,
            ..Self::default()
        }
    }

    pub fn scoped(mut self, report_id: Option<ReportId>) -> Self {
        self.report_id = report_id;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProjectOrder {
    #[default]
    UpdatedDesc,
    CreatedDesc,
}

/// Project predicates. Results always end with project id ascending as the final sort key.
#[derive(Debug, Clone, Default)]
pub struct ProjectFilter {
    pub competitor_id: Option<CompetitorId>,
    /// Empty means any status.
    pub statuses: Vec<ProjectStatus>,
    /// Inclusive bounds on `created_at`.
    pub created_between: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub order: ProjectOrder,
    pub limit: Option<usize>,
}

impl ProjectFilter {
    pub fn for_competitor(competitor_id: CompetitorId) -> Self {
        Self {
            competitor_id: Some(competitor_id),
            ..Self::default()
        }
    }
}

/// Writes available inside one store transaction.
///
/// Every method is atomic on its own; the enclosing transaction decides
/// whether the batch as a whole is kept.
pub trait WriteTx {
    fn report_exists(&mut self, report_id: ReportId) -> Result<bool, StorageError>;

    fn project_has_competitor(
        &mut self,
        project_id: ProjectId,
        competitor_id: CompetitorId,
    ) -> Result<bool, StorageError>;

    fn count_versions(&mut self, report_id: ReportId) -> Result<u64, StorageError>;

    /// Competitor the report points at right now. `NotFound` when the report does not exist.
    fn report_competitor(
        &mut self,
        report_id: ReportId,
    ) -> Result<Option<CompetitorId>, StorageError>;

    /// Returns the project the report pointed at before the write.
    /// `NotFound` when the report does not exist.
    fn update_report_project(
        &mut self,
        report_id: ReportId,
        project_id: Option<ProjectId>,
    ) -> Result<Option<ProjectId>, StorageError>;

    fn insert_version(&mut self, version: &ReportVersion) -> Result<(), StorageError>;

    fn delete_version(&mut self, version_id: VersionId) -> Result<(), StorageError>;
}

/// Store gateway used by the reconciliation engine.
///
/// Reads take `&self` and must be safe to call from several resolver
/// workers at once; writes only happen through [`Storage::transaction`].
pub trait Storage: Sync {
    fn find_reports(&self, filter: &ReportFilter) -> Result<Vec<ReportSummary>, StorageError>;

    fn find_first_report(
        &self,
        filter: &ReportFilter,
    ) -> Result<Option<ReportSummary>, StorageError> {
        let limited = ReportFilter {
            limit: Some(1),
            ..filter.clone()
        };
        Ok(self.find_reports(&limited)?.into_iter().next())
    }

    fn count_reports(&self, filter: &ReportFilter) -> Result<u64, StorageError>;

    fn get_report(&self, report_id: ReportId) -> Result<Option<ReportSummary>, StorageError>;

    fn find_projects(&self, filter: &ProjectFilter) -> Result<Vec<Project>, StorageError>;

    fn get_project(&self, project_id: ProjectId) -> Result<Option<Project>, StorageError>;

    fn project_has_competitor(
        &self,
        project_id: ProjectId,
        competitor_id: CompetitorId,
    ) -> Result<bool, StorageError>;

    fn get_competitor(
        &self,
        competitor_id: CompetitorId,
    ) -> Result<Option<Competitor>, StorageError>;

    fn get_versions(&self, report_id: ReportId) -> Result<Vec<ReportVersion>, StorageError>;

    fn count_versions(&self, report_id: ReportId) -> Result<u64, StorageError>;

    fn get_schedules(&self, report_id: ReportId) -> Result<Vec<ReportSchedule>, StorageError>;

    fn get_quality(&self, report_id: ReportId) -> Result<Option<QualityMetadata>, StorageError>;

    /// Runs `f` inside one all-or-nothing transaction. `Err` from `f` rolls back.
    fn transaction<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut dyn WriteTx) -> Result<T, StorageError>;

    /// Installs store-level guards against new anomalies. Idempotent.
    /// Returns the names of the constraints now in place.
    fn apply_integrity_constraints(&self) -> Result<Vec<String>, StorageError>;

    fn drop_integrity_constraints(&self) -> Result<(), StorageError>;
}
