use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use recon_core::{
    Competitor, CompetitorId, Project, ProjectId, QualityMetadata, ReportId, ReportSchedule,
    ReportSummary, ReportVersion, VersionId,
};
use recon_storage::{ProjectFilter, ReportFilter, Storage, StorageError, WriteTx};

/// Storage wrapper that fails on demand.
///
/// `set_reads_down(true)` makes report and project queries fail as if the
/// store were unreachable. `set_transactions_down(true)` makes every
/// transaction fail before its body runs. `fail_writes_for` makes
/// association writes for one report fail inside otherwise healthy
/// transactions.
pub struct FlakyStorage<S: Storage> {
    inner: S,
    reads_down: AtomicBool,
    transactions_down: AtomicBool,
    failing_reports: Mutex<HashSet<ReportId>>,
}

impl<S: Storage> FlakyStorage<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            reads_down: AtomicBool::new(false),
            transactions_down: AtomicBool::new(false),
            failing_reports: Mutex::new(HashSet::new()),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn set_reads_down(&self, down: bool) {
        self.reads_down.store(down, Ordering::SeqCst);
    }

    pub fn set_transactions_down(&self, down: bool) {
        self.transactions_down.store(down, Ordering::SeqCst);
    }

    pub fn fail_writes_for(&self, report_id: ReportId) -> Result<(), StorageError> {
        self.failing()?.insert(report_id);
        Ok(())
    }

    fn failing(&self) -> Result<std::sync::MutexGuard<'_, HashSet<ReportId>>, StorageError> {
        self.failing_reports
            .lock()
            .map_err(|_| StorageError::Unavailable("failure set poisoned".into()))
    }

    fn check_reads(&self) -> Result<(), StorageError> {
        if self.reads_down.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("injected read failure".into()));
        }
        Ok(())
    }
}

struct FlakyWriteTx<'t> {
    inner: &'t mut dyn WriteTx,
    failing: &'t HashSet<ReportId>,
}

impl WriteTx for FlakyWriteTx<'_> {
    fn report_exists(&mut self, report_id: ReportId) -> Result<bool, StorageError> {
        self.inner.report_exists(report_id)
    }

    fn project_has_competitor(
        &mut self,
        project_id: ProjectId,
        competitor_id: CompetitorId,
    ) -> Result<bool, StorageError> {
        self.inner.project_has_competitor(project_id, competitor_id)
    }

    fn count_versions(&mut self, report_id: ReportId) -> Result<u64, StorageError> {
        self.inner.count_versions(report_id)
    }

    fn report_competitor(
        &mut self,
        report_id: ReportId,
    ) -> Result<Option<CompetitorId>, StorageError> {
        self.inner.report_competitor(report_id)
    }

    fn update_report_project(
        &mut self,
        report_id: ReportId,
        project_id: Option<ProjectId>,
    ) -> Result<Option<ProjectId>, StorageError> {
        if self.failing.contains(&report_id) {
            return Err(StorageError::Unavailable(format!(
                "injected write failure for report {report_id}"
            )));
        }
        self.inner.update_report_project(report_id, project_id)
    }

    fn insert_version(&mut self, version: &ReportVersion) -> Result<(), StorageError> {
        self.inner.insert_version(version)
    }

    fn delete_version(&mut self, version_id: VersionId) -> Result<(), StorageError> {
        self.inner.delete_version(version_id)
    }
}

impl<S: Storage> Storage for FlakyStorage<S> {
    fn find_reports(&self, filter: &ReportFilter) -> Result<Vec<ReportSummary>, StorageError> {
        self.check_reads()?;
        self.inner.find_reports(filter)
    }

    fn count_reports(&self, filter: &ReportFilter) -> Result<u64, StorageError> {
        self.check_reads()?;
        self.inner.count_reports(filter)
    }

    fn get_report(&self, report_id: ReportId) -> Result<Option<ReportSummary>, StorageError> {
        self.inner.get_report(report_id)
    }

    fn find_projects(&self, filter: &ProjectFilter) -> Result<Vec<Project>, StorageError> {
        self.check_reads()?;
        self.inner.find_projects(filter)
    }

    fn get_project(&self, project_id: ProjectId) -> Result<Option<Project>, StorageError> {
        self.inner.get_project(project_id)
    }

    fn project_has_competitor(
        &self,
        project_id: ProjectId,
        competitor_id: CompetitorId,
    ) -> Result<bool, StorageError> {
        self.inner.project_has_competitor(project_id, competitor_id)
    }

    fn get_competitor(
        &self,
        competitor_id: CompetitorId,
    ) -> Result<Option<Competitor>, StorageError> {
        self.inner.get_competitor(competitor_id)
    }

    fn get_versions(&self, report_id: ReportId) -> Result<Vec<ReportVersion>, StorageError> {
        self.inner.get_versions(report_id)
    }

    fn count_versions(&self, report_id: ReportId) -> Result<u64, StorageError> {
        self.inner.count_versions(report_id)
    }

    fn get_schedules(&self, report_id: ReportId) -> Result<Vec<ReportSchedule>, StorageError> {
        self.inner.get_schedules(report_id)
    }

    fn get_quality(&self, report_id: ReportId) -> Result<Option<QualityMetadata>, StorageError> {
        self.inner.get_quality(report_id)
    }

    fn transaction<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut dyn WriteTx) -> Result<T, StorageError>,
    {
        if self.transactions_down.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("injected transaction failure".into()));
        }
        let failing = self.failing()?.clone();
        self.inner.transaction(|tx| {
            let mut flaky = FlakyWriteTx {
                inner: tx,
                failing: &failing,
            };
            f(&mut flaky)
        })
    }

    fn apply_integrity_constraints(&self) -> Result<Vec<String>, StorageError> {
        self.inner.apply_integrity_constraints()
    }

    fn drop_integrity_constraints(&self) -> Result<(), StorageError> {
        self.inner.drop_integrity_constraints()
    }
}
