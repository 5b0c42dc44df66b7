//! Batched, transactional execution of per-report work.
//!
//! Items are grouped into batches; each batch runs inside one store
//! transaction. With `continue_on_error` a failing item is recorded and the
//! batch carries on. Without it the batch is rolled back, the items it had
//! already written are reported as failed, and nothing after it is attempted.
//!
//! Dry runs drive the same work through [`SimulatedWriter`], which answers
//! from committed state and reports the failures a real write would hit.

use chrono::{DateTime, Utc};
use recon_core::{CompetitorId, ProjectId, ReportId, ReportVersion};
use recon_storage::{Storage, StorageError, WriteTx};

pub const ROLLED_BACK: &str = "rolled back: batch aborted after an earlier failure";
pub const NOT_ATTEMPTED: &str = "not attempted: run stopped after an earlier failure";

/// Writes a unit of batch work may issue.
pub trait BatchWriter {
    fn project_has_competitor(
        &mut self,
        project_id: ProjectId,
        competitor_id: CompetitorId,
    ) -> Result<bool, StorageError>;

    fn count_versions(&mut self, report_id: ReportId) -> Result<u64, StorageError>;

    /// Current competitor of the report; `NotFound` when it is gone.
    fn report_competitor(
        &mut self,
        report_id: ReportId,
    ) -> Result<Option<CompetitorId>, StorageError>;

    /// Returns the previous project of the report.
    fn update_report_project(
        &mut self,
        report_id: ReportId,
        project_id: Option<ProjectId>,
    ) -> Result<Option<ProjectId>, StorageError>;

    fn insert_version(&mut self, version: &ReportVersion) -> Result<(), StorageError>;
}

struct LiveWriter<'t> {
    tx: &'t mut dyn WriteTx,
}

impl BatchWriter for LiveWriter<'_> {
    fn project_has_competitor(
        &mut self,
        project_id: ProjectId,
        competitor_id: CompetitorId,
    ) -> Result<bool, StorageError> {
        self.tx.project_has_competitor(project_id, competitor_id)
    }

    fn count_versions(&mut self, report_id: ReportId) -> Result<u64, StorageError> {
        self.tx.count_versions(report_id)
    }

    fn report_competitor(
        &mut self,
        report_id: ReportId,
    ) -> Result<Option<CompetitorId>, StorageError> {
        self.tx.report_competitor(report_id)
    }

    fn update_report_project(
        &mut self,
        report_id: ReportId,
        project_id: Option<ProjectId>,
    ) -> Result<Option<ProjectId>, StorageError> {
        self.tx.update_report_project(report_id, project_id)
    }

    fn insert_version(&mut self, version: &ReportVersion) -> Result<(), StorageError> {
        self.tx.insert_version(version)
    }
}

/// Read-only stand-in for a transaction. Mutations are checked, never applied.
pub struct SimulatedWriter<'a, S: Storage> {
    storage: &'a S,
}

impl<'a, S: Storage> SimulatedWriter<'a, S> {
    pub fn new(storage: &'a S) -> Self {
        Self { storage }
    }
}

impl<S: Storage> BatchWriter for SimulatedWriter<'_, S> {
    fn project_has_competitor(
        &mut self,
        project_id: ProjectId,
        competitor_id: CompetitorId,
    ) -> Result<bool, StorageError> {
        self.storage.project_has_competitor(project_id, competitor_id)
    }

    fn count_versions(&mut self, report_id: ReportId) -> Result<u64, StorageError> {
        self.storage.count_versions(report_id)
    }

    fn report_competitor(
        &mut self,
        report_id: ReportId,
    ) -> Result<Option<CompetitorId>, StorageError> {
        self.storage
            .get_report(report_id)?
            .map(|r| r.competitor_id)
            .ok_or_else(|| StorageError::NotFound(format!("report {report_id}")))
    }

    fn update_report_project(
        &mut self,
        report_id: ReportId,
        project_id: Option<ProjectId>,
    ) -> Result<Option<ProjectId>, StorageError> {
        let report = self
            .storage
            .get_report(report_id)?
            .ok_or_else(|| StorageError::NotFound(format!("report {report_id}")))?;
        if let Some(project_id) = project_id {
            if self.storage.get_project(project_id)?.is_none() {
                return Err(StorageError::ConstraintViolation(format!(
                    "update project of report {report_id}: project {project_id} does not exist"
                )));
            }
        }
        Ok(report.project_id)
    }

    fn insert_version(&mut self, version: &ReportVersion) -> Result<(), StorageError> {
        let report_id = version.report_id;
        if self.storage.get_report(report_id)?.is_none() {
            return Err(StorageError::ConstraintViolation(format!(
                "insert version for report {report_id}: report does not exist"
            )));
        }
        let taken = self
            .storage
            .get_versions(report_id)?
            .iter()
            .any(|v| v.version == version.version);
        if taken {
            return Err(StorageError::ConstraintViolation(format!(
                "insert version for report {report_id}: version {} exists",
                version.version
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome<T> {
    Done(T),
    /// Deliberately not written; never counts as an error.
    Skipped(String),
    /// Failed a pre-write check. Recorded, never aborts the batch.
    Rejected(String),
    /// The write itself failed.
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct ItemRecord<T> {
    pub report_id: ReportId,
    pub outcome: ItemOutcome<T>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct BatchRun<T> {
    pub records: Vec<ItemRecord<T>>,
    pub batches_committed: usize,
    pub stopped: bool,
}

pub struct BatchRunner<'a, S: Storage> {
    storage: &'a S,
    batch_size: usize,
    continue_on_error: bool,
    dry_run: bool,
}

impl<'a, S: Storage> BatchRunner<'a, S> {
    pub fn new(storage: &'a S, batch_size: usize, continue_on_error: bool, dry_run: bool) -> Self {
        Self {
            storage,
            batch_size: batch_size.max(1),
            continue_on_error,
            dry_run,
        }
    }

    /// Runs `work` once per item. Records come back in input order.
    pub fn run<I, T, K, W>(&self, items: &[I], report_id_of: K, mut work: W) -> BatchRun<T>
    where
        K: Fn(&I) -> ReportId,
        W: FnMut(&mut dyn BatchWriter, &I) -> ItemOutcome<T>,
    {
        let mut run = BatchRun {
            records: Vec::with_capacity(items.len()),
            batches_committed: 0,
            stopped: false,
        };

        for (index, batch) in items.chunks(self.batch_size).enumerate() {
            if run.stopped {
                run.records.extend(batch.iter().map(|item| ItemRecord {
                    report_id: report_id_of(item),
                    outcome: ItemOutcome::Skipped(NOT_ATTEMPTED.to_string()),
                    at: Utc::now(),
                }));
                continue;
            }

            let mut records = Vec::with_capacity(batch.len());
            let mut aborted = false;
            let committed = if self.dry_run {
                let mut writer = SimulatedWriter::new(self.storage);
                self.run_batch(
                    batch,
                    &report_id_of,
                    &mut work,
                    &mut writer,
                    &mut records,
                    &mut aborted,
                );
                Ok(())
            } else {
                self.storage.transaction(|tx| {
                    let mut writer = LiveWriter { tx };
                    self.run_batch(
                        batch,
                        &report_id_of,
                        &mut work,
                        &mut writer,
                        &mut records,
                        &mut aborted,
                    );
                    if aborted {
                        Err(StorageError::Unavailable(format!("batch {index} aborted")))
                    } else {
                        Ok(())
                    }
                })
            };

            if aborted {
                roll_back(&mut records);
                run.stopped = true;
                tracing::warn!(
                    batch = index,
                    dry_run = self.dry_run,
                    "batch rolled back, stopping"
                );
            } else if let Err(e) = committed {
                let message = e.to_string();
                tracing::error!(batch = index, error = %e, "batch transaction failed");
                for record in records.iter_mut() {
                    if matches!(record.outcome, ItemOutcome::Done(_)) {
                        record.outcome = ItemOutcome::Failed(message.clone());
                    }
                }
                // The transaction may have failed before reaching some items.
                let at = Utc::now();
                let unreached = batch.get(records.len()..).unwrap_or_default();
                records.extend(unreached.iter().map(|item| ItemRecord {
                    report_id: report_id_of(item),
                    outcome: ItemOutcome::Failed(message.clone()),
                    at,
                }));
                if !self.continue_on_error {
                    run.stopped = true;
                }
            } else {
                run.batches_committed += 1;
                tracing::debug!(
                    batch = index,
                    items = batch.len(),
                    dry_run = self.dry_run,
                    "batch committed"
                );
            }
            run.records.extend(records);
        }
        run
    }

    fn run_batch<I, T, K, W>(
        &self,
        batch: &[I],
        report_id_of: &K,
        work: &mut W,
        writer: &mut dyn BatchWriter,
        records: &mut Vec<ItemRecord<T>>,
        aborted: &mut bool,
    ) where
        K: Fn(&I) -> ReportId,
        W: FnMut(&mut dyn BatchWriter, &I) -> ItemOutcome<T>,
    {
        for item in batch {
            let report_id = report_id_of(item);
            if *aborted {
                records.push(ItemRecord {
                    report_id,
                    outcome: ItemOutcome::Skipped(NOT_ATTEMPTED.to_string()),
                    at: Utc::now(),
                });
                continue;
            }
            let outcome = work(&mut *writer, item);
            let at = Utc::now();
            match &outcome {
                ItemOutcome::Failed(error) => {
                    tracing::warn!(
                        report_id = %report_id,
                        error = %error,
                        timestamp = %at,
                        "item failed"
                    );
                    if !self.continue_on_error {
                        *aborted = true;
                    }
                }
                ItemOutcome::Rejected(error) => {
                    tracing::warn!(
                        report_id = %report_id,
                        error = %error,
                        timestamp = %at,
                        "item rejected"
                    );
                }
                ItemOutcome::Skipped(reason) => {
                    tracing::debug!(report_id = %report_id, reason = %reason, "item skipped");
                }
                ItemOutcome::Done(_) => {}
            }
            records.push(ItemRecord {
                report_id,
                outcome,
                at,
            });
        }
    }
}

fn roll_back<T>(records: &mut [ItemRecord<T>]) {
    for record in records.iter_mut() {
        if matches!(record.outcome, ItemOutcome::Done(_)) {
            record.outcome = ItemOutcome::Failed(ROLLED_BACK.to_string());
        }
    }
}
