//! Run sequencing and step bookkeeping.
//!
//! A run walks a fixed list of steps. Each step moves
//! `pending -> running -> completed | failed`, or `pending -> skipped`.
//! [`StepTracker`] is the only place that changes step state and it rejects
//! any other move, including starting a step whose predecessor has not
//! finished cleanly.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use recon_core::{Confidence, ReportId, ReportSummary, Resolution, RunId};
use recon_storage::{ReportFilter, Storage, StorageError};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::backup::{BackupArtifact, BackupOptions, BackupService, BackupSink};
use crate::config::ReconcileConfig;
use crate::discovery::{PriorityRule, ProjectCache, ProjectDiscovery};
use crate::error::EngineError;
use crate::resolver::{AssociationResolver, ResolutionStats};
use crate::scanner::{AnomalyScanner, ScanSummary};
use crate::synthesizer::{RepairOptions, RepairSummary, ZombieRepairer};
use crate::updater::{BatchUpdater, UpdateErrorRecord, UpdateOptions, UpdateSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    PreValidation,
    Identify,
    Backup,
    ResolveUpdate,
    ApplyConstraints,
    PostValidation,
}

impl StepId {
    pub const ALL: [StepId; 6] = [
        StepId::PreValidation,
        StepId::Identify,
        StepId::Backup,
        StepId::ResolveUpdate,
        StepId::ApplyConstraints,
        StepId::PostValidation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreValidation => "pre_validation",
            Self::Identify => "identify",
            Self::Backup => "backup",
            Self::ResolveUpdate => "resolve_update",
            Self::ApplyConstraints => "apply_constraints",
            Self::PostValidation => "post_validation",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::PreValidation => "Pre-migration validation",
            Self::Identify => "Identify orphaned and zombie reports",
            Self::Backup => "Back up affected records",
            Self::ResolveUpdate => "Resolve associations and apply updates",
            Self::ApplyConstraints => "Apply integrity constraints",
            Self::PostValidation => "Post-migration validation",
        }
    }

    /// Steps whose effects change stored data in an order-dependent way.
    pub fn rollback_sensitive(&self) -> bool {
        matches!(self, Self::ResolveUpdate | Self::ApplyConstraints)
    }

    fn predecessor(&self) -> Option<StepId> {
        let index = Self::ALL.iter().position(|s| s == self)?;
        index.checked_sub(1).map(|i| Self::ALL[i])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// A successor may start once its predecessor is in one of these.
    fn clears_successor(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationStep {
    pub id: StepId,
    pub name: String,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub result: Option<Value>,
    pub error: Option<String>,
    /// Why the step was skipped.
    pub note: Option<String>,
    pub rollback_required: bool,
}

impl MigrationStep {
    fn new(id: StepId) -> Self {
        Self {
            id,
            name: id.title().to_string(),
            status: StepStatus::Pending,
            started_at: None,
            finished_at: None,
            duration_ms: None,
            result: None,
            error: None,
            note: None,
            rollback_required: false,
        }
    }

    fn finish(&mut self, status: StepStatus) {
        let now = Utc::now();
        self.status = status;
        self.finished_at = Some(now);
        self.duration_ms = self.started_at.map(|s| (now - s).num_milliseconds());
    }
}

#[derive(Debug, Clone)]
pub struct StepTracker {
    steps: Vec<MigrationStep>,
}

impl Default for StepTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StepTracker {
    pub fn new() -> Self {
        Self {
            steps: StepId::ALL.iter().map(|&id| MigrationStep::new(id)).collect(),
        }
    }

    pub fn steps(&self) -> &[MigrationStep] {
        &self.steps
    }

    pub fn into_steps(self) -> Vec<MigrationStep> {
        self.steps
    }

    pub fn status(&self, id: StepId) -> StepStatus {
        self.get(id).status
    }

    fn get(&self, id: StepId) -> &MigrationStep {
        // Every StepId has an entry; constructed from StepId::ALL.
        &self.steps[id as usize]
    }

    fn get_mut(&mut self, id: StepId) -> &mut MigrationStep {
        &mut self.steps[id as usize]
    }

    fn expect_status(
        &self,
        id: StepId,
        expected: StepStatus,
        to: StepStatus,
    ) -> Result<(), EngineError> {
        let current = self.status(id);
        if current != expected {
            return Err(EngineError::InvalidTransition(format!(
                "{}: {} -> {}",
                id.as_str(),
                current.as_str(),
                to.as_str()
            )));
        }
        Ok(())
    }

    pub fn start(&mut self, id: StepId) -> Result<(), EngineError> {
        self.expect_status(id, StepStatus::Pending, StepStatus::Running)?;
        if let Some(prev) = id.predecessor() {
            let prev_status = self.status(prev);
            if !prev_status.clears_successor() {
                return Err(EngineError::InvalidTransition(format!(
                    "{} cannot start while {} is {}",
                    id.as_str(),
                    prev.as_str(),
                    prev_status.as_str()
                )));
            }
        }
        let step = self.get_mut(id);
        step.status = StepStatus::Running;
        step.started_at = Some(Utc::now());
        tracing::info!(step = id.as_str(), "step started");
        Ok(())
    }

    pub fn complete(&mut self, id: StepId, result: Value) -> Result<(), EngineError> {
        self.expect_status(id, StepStatus::Running, StepStatus::Completed)?;
        let step = self.get_mut(id);
        step.result = Some(result);
        step.finish(StepStatus::Completed);
        tracing::info!(step = id.as_str(), duration_ms = step.duration_ms, "step completed");
        Ok(())
    }

    /// Fails `id`, flags earlier destructive steps for rollback and turns
    /// every pending step into a no-op.
    pub fn fail(
        &mut self,
        id: StepId,
        error: String,
        result: Option<Value>,
    ) -> Result<(), EngineError> {
        self.expect_status(id, StepStatus::Running, StepStatus::Failed)?;
        {
            let step = self.get_mut(id);
            step.error = Some(error.clone());
            step.result = result;
            step.rollback_required = id.rollback_sensitive();
            step.finish(StepStatus::Failed);
        }
        for step in self.steps.iter_mut() {
            if step.status == StepStatus::Completed && step.id.rollback_sensitive() {
                step.rollback_required = true;
            }
        }
        tracing::error!(step = id.as_str(), error = %error, "step failed");
        self.skip_remaining(&format!("not run: {} failed", id.as_str()));
        Ok(())
    }

    pub fn skip(&mut self, id: StepId, note: &str) -> Result<(), EngineError> {
        self.expect_status(id, StepStatus::Pending, StepStatus::Skipped)?;
        let step = self.get_mut(id);
        step.status = StepStatus::Skipped;
        step.note = Some(note.to_string());
        tracing::info!(step = id.as_str(), note, "step skipped");
        Ok(())
    }

    pub fn skip_remaining(&mut self, note: &str) {
        for step in self.steps.iter_mut() {
            if step.status == StepStatus::Pending {
                step.status = StepStatus::Skipped;
                step.note = Some(note.to_string());
            }
        }
    }

    pub fn rollback_candidates(&self) -> Vec<StepId> {
        self.steps
            .iter()
            .filter(|s| s.rollback_required)
            .map(|s| s.id)
            .collect()
    }
}

/// Shared flag checked before each step starts.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    pub dry_run: bool,
    pub skip_backup: bool,
    pub force_run: bool,
    /// Limit the run to one report.
    pub report_id: Option<ReportId>,
    pub min_confidence: Option<Confidence>,
    pub batch_size: Option<usize>,
    pub continue_on_error: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub orphaned_found: usize,
    pub zombies_found: usize,
    pub unviewable_found: usize,
    pub resolution: ResolutionStats,
    pub associations_written: usize,
    pub versions_created: usize,
    pub failed: usize,
    pub skipped: usize,
    pub validation_failures: usize,
    /// Repaired anomalies over anomalies found; 1.0 when nothing was found.
    pub success_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub status: RunStatus,
    pub error: Option<String>,
    pub retryable: bool,
    pub steps: Vec<MigrationStep>,
    pub rollback_candidates: Vec<StepId>,
    pub summary: RunSummary,
    pub backup: Option<BackupArtifact>,
    pub constraints: Vec<String>,
    pub resolutions: Vec<Resolution>,
    pub update: Option<UpdateSummary>,
    pub repair: Option<RepairSummary>,
}

impl RunReport {
    /// 0 only when the run succeeded and no item failed.
    pub fn exit_code(&self) -> i32 {
        if self.status == RunStatus::Success && self.summary.failed == 0 {
            0
        } else {
            1
        }
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json(&self, path: &Path) -> Result<(), EngineError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

#[derive(Default)]
struct RunState {
    scan: ScanSummary,
    backup: Option<BackupArtifact>,
    resolutions: Vec<Resolution>,
    update: Option<UpdateSummary>,
    repair: Option<RepairSummary>,
    constraints: Vec<String>,
}

pub struct MigrationOrchestrator<'a, S: Storage> {
    storage: &'a S,
    cache: &'a dyn ProjectCache,
    sink: &'a dyn BackupSink,
    config: &'a ReconcileConfig,
    cancel: CancelHandle,
}

impl<'a, S: Storage> MigrationOrchestrator<'a, S> {
    pub fn new(
        storage: &'a S,
        cache: &'a dyn ProjectCache,
        sink: &'a dyn BackupSink,
        config: &'a ReconcileConfig,
        cancel: CancelHandle,
    ) -> Self {
        Self {
            storage,
            cache,
            sink,
            config,
            cancel,
        }
    }

    /// Runs every step in order. Step failures end up in the report;
    /// `Err` is reserved for bookkeeping faults.
    pub fn run(&self, options: &RunOptions) -> Result<RunReport, EngineError> {
        let run_id = RunId::new();
        let started_at = Utc::now();
        let mut tracker = StepTracker::new();
        let mut state = RunState::default();
        let mut status = RunStatus::Success;
        let mut error = None;
        let mut retryable = false;

        tracing::info!(run_id = %run_id, dry_run = options.dry_run, "run started");

        for step in StepId::ALL {
            if tracker.status(step) != StepStatus::Pending {
                continue;
            }
            if self.cancel.is_cancelled() {
                tracing::warn!(run_id = %run_id, step = step.as_str(), "run cancelled");
                tracker.skip_remaining("run cancelled");
                status = RunStatus::Cancelled;
                error = Some(EngineError::Cancelled(step.as_str().to_string()).to_string());
                break;
            }
            if let Some(note) = self.skip_reason(step, options) {
                tracker.skip(step, note)?;
                continue;
            }

            tracker.start(step)?;
            match self.execute(step, options, run_id, &mut state) {
                Ok(result) => tracker.complete(step, result)?,
                Err(e) => {
                    retryable = e.is_retryable();
                    let partial = self.partial_result(step, &state);
                    tracker.fail(step, e.to_string(), partial)?;
                    status = RunStatus::Failed;
                    error = Some(e.to_string());
                    break;
                }
            }

            if step == StepId::Identify && state.scan.is_clean() {
                tracker.skip_remaining("no anomalies found");
                break;
            }
        }

        let summary = summarize(&state);
        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            dry_run: options.dry_run,
            status,
            error,
            retryable,
            rollback_candidates: tracker.rollback_candidates(),
            steps: tracker.into_steps(),
            summary,
            backup: state.backup,
            constraints: state.constraints,
            resolutions: state.resolutions,
            update: state.update,
            repair: state.repair,
        };
        tracing::info!(
            run_id = %run_id,
            status = ?report.status,
            written = report.summary.associations_written,
            versions = report.summary.versions_created,
            failed = report.summary.failed,
            "run finished"
        );
        Ok(report)
    }

    fn skip_reason(&self, step: StepId, options: &RunOptions) -> Option<&'static str> {
        match step {
            StepId::Backup if options.skip_backup => Some("backup skipped by caller"),
            StepId::Backup if options.dry_run => Some("dry run writes nothing"),
            StepId::ApplyConstraints if options.dry_run => Some("dry run writes nothing"),
            StepId::ApplyConstraints if !self.config.run.apply_constraints => {
                Some("disabled in configuration")
            }
            _ => None,
        }
    }

    fn execute(
        &self,
        step: StepId,
        options: &RunOptions,
        run_id: RunId,
        state: &mut RunState,
    ) -> Result<Value, EngineError> {
        match step {
            StepId::PreValidation => self.pre_validate(options),
            StepId::Identify => {
                state.scan = AnomalyScanner::new(self.storage).scan(options.report_id)?;
                Ok(json!({
                    "orphaned": state.scan.orphaned.len(),
                    "zombies": state.scan.zombies.len(),
                    "unviewable": state.scan.unviewable.len(),
                }))
            }
            StepId::Backup => {
                let artifact = BackupService::new(self.storage, self.sink).snapshot(
                    &affected_ids(&state.scan),
                    &BackupOptions {
                        format: self.config.backup.format,
                        compress: self.config.backup.compress,
                        correlation_id: run_id.to_string(),
                    },
                )?;
                let result = json!({
                    "path": artifact.path,
                    "checksum": artifact.checksum,
                    "records": artifact.record_count,
                });
                state.backup = Some(artifact);
                Ok(result)
            }
            StepId::ResolveUpdate => self.resolve_and_update(options, state),
            StepId::ApplyConstraints => {
                state.constraints = self.storage.apply_integrity_constraints()?;
                Ok(json!({ "constraints": state.constraints }))
            }
            StepId::PostValidation => self.post_validate(options, state),
        }
    }

    fn pre_validate(&self, options: &RunOptions) -> Result<Value, EngineError> {
        let scanner = AnomalyScanner::new(self.storage);
        let total = self
            .storage
            .count_reports(&ReportFilter::default())
            .map_err(EngineError::Scan)?;

        if let Some(report_id) = options.report_id {
            if self.storage.get_report(report_id).map_err(EngineError::Scan)?.is_none() {
                return Err(EngineError::Validation(format!("report {report_id} does not exist")));
            }
        }
        if !options.skip_backup && !options.dry_run {
            self.sink.check_writable()?;
        }

        let anomalies =
            scanner.count_orphaned(options.report_id)? + scanner.count_zombies(options.report_id)?;
        let limit = self.config.run.max_changes_without_force;
        if anomalies > limit && !options.force_run {
            return Err(EngineError::Validation(format!(
                "{anomalies} anomalies exceed the limit of {limit}; force the run to proceed"
            )));
        }
        Ok(json!({
            "reports": total,
            "anomalies": anomalies,
            "forced": options.force_run,
        }))
    }

    fn resolve_and_update(
        &self,
        options: &RunOptions,
        state: &mut RunState,
    ) -> Result<Value, EngineError> {
        let updater_config = &self.config.updater;
        let update_options = UpdateOptions {
            min_confidence: options.min_confidence.unwrap_or(updater_config.min_confidence),
            batch_size: options.batch_size.unwrap_or(updater_config.batch_size),
            continue_on_error: options
                .continue_on_error
                .unwrap_or(updater_config.continue_on_error),
            dry_run: options.dry_run,
            validate_relationships: updater_config.validate_relationships,
        };

        let discovery = ProjectDiscovery::new(self.storage, self.cache);
        let rule = PriorityRule::from_name(&self.config.discovery.priority_rule);
        let resolver = AssociationResolver::new(discovery, &self.config.resolver, rule);
        state.resolutions = resolver.resolve(&state.scan.orphaned);

        let update = BatchUpdater::new(self.storage).update(&state.resolutions, &update_options)?;
        let discovery = ProjectDiscovery::new(self.storage, self.cache);
        for competitor_id in update.touched_competitors() {
            discovery.invalidate_competitor(competitor_id);
        }
        let stopped = update.stopped;
        state.update = Some(update);
        if stopped {
            let errors = state.update.as_ref().map(|u| u.errors.as_slice()).unwrap_or_default();
            return Err(stop_error(errors, "update stopped after a failed write"));
        }

        // Zombies are re-read so those that just gained a project get richer content.
        let mut zombies = Vec::with_capacity(state.scan.zombies.len());
        for zombie in &state.scan.zombies {
            match self.storage.get_report(zombie.id)? {
                Some(current) if !options.dry_run => zombies.push(current),
                Some(_) => zombies.push(zombie.clone()),
                None => tracing::warn!(report_id = %zombie.id, "zombie report vanished"),
            }
        }
        let repair = ZombieRepairer::new(self.storage).repair_zombies(
            &zombies,
            &RepairOptions {
                batch_size: update_options.batch_size,
                continue_on_error: update_options.continue_on_error,
                dry_run: options.dry_run,
            },
        )?;
        let repair_stopped = repair
            .stopped
            .then(|| stop_error(&repair.errors, "zombie repair stopped after a failed write"));
        state.repair = Some(repair);
        if let Some(e) = repair_stopped {
            return Err(e);
        }

        Ok(self.partial_result(StepId::ResolveUpdate, state).unwrap_or(Value::Null))
    }

    fn post_validate(&self, options: &RunOptions, state: &RunState) -> Result<Value, EngineError> {
        let scanner = AnomalyScanner::new(self.storage);
        let remaining_orphaned = scanner.count_orphaned(options.report_id)?;
        let remaining_zombies = scanner.count_zombies(options.report_id)?;
        let result = json!({
            "remaining_orphaned": remaining_orphaned,
            "remaining_zombies": remaining_zombies,
        });
        if options.dry_run {
            return Ok(result);
        }

        let mut problems = Vec::new();
        if let Some(repair) = &state.repair {
            for report_id in &repair.repaired {
                if self.storage.count_versions(*report_id)? == 0 {
                    problems.push(format!("report {report_id} is still a zombie"));
                }
            }
        }
        if let Some(update) = &state.update {
            for change in &update.applied {
                let current = self.storage.get_report(change.report_id)?.and_then(|r| r.project_id);
                if current != Some(change.new_project_id) {
                    problems.push(format!("report {} lost its new project", change.report_id));
                } else if !self
                    .storage
                    .project_has_competitor(change.new_project_id, change.competitor_id)?
                {
                    problems.push(format!(
                        "report {} points at project {} which is not linked to competitor {}",
                        change.report_id, change.new_project_id, change.competitor_id
                    ));
                }
            }
        }
        if !problems.is_empty() {
            return Err(EngineError::Validation(problems.join("; ")));
        }
        Ok(result)
    }

    fn partial_result(&self, step: StepId, state: &RunState) -> Option<Value> {
        if step != StepId::ResolveUpdate {
            return None;
        }
        let stats = ResolutionStats::from_resolutions(&state.resolutions);
        Some(json!({
            "resolution": stats,
            "update": state.update.as_ref().map(|u| json!({
                "successful": u.successful,
                "failed": u.failed,
                "skipped": u.skipped,
                "validation_failures": u.validation_failures,
                "batches_committed": u.batches_committed,
            })),
            "repair": state.repair.as_ref().map(|r| json!({
                "created": r.created,
                "skipped": r.skipped,
                "failed": r.failed,
            })),
        }))
    }
}

fn stop_error(errors: &[UpdateErrorRecord], message: &str) -> EngineError {
    match errors.first() {
        Some(first) => EngineError::Update {
            report_id: first.report_id,
            message: format!("{message}: {}", first.error),
        },
        None => EngineError::Storage(StorageError::Unavailable(message.to_string())),
    }
}

/// Orphaned and zombie ids, first occurrence wins.
fn affected_ids(scan: &ScanSummary) -> Vec<ReportId> {
    let mut seen = HashSet::new();
    scan.orphaned
        .iter()
        .chain(scan.zombies.iter())
        .map(|r: &ReportSummary| r.id)
        .filter(|id| seen.insert(*id))
        .collect()
}

fn summarize(state: &RunState) -> RunSummary {
    let mut summary = RunSummary {
        orphaned_found: state.scan.orphaned.len(),
        zombies_found: state.scan.zombies.len(),
        unviewable_found: state.scan.unviewable.len(),
        resolution: ResolutionStats::from_resolutions(&state.resolutions),
        ..RunSummary::default()
    };
    if let Some(update) = &state.update {
        summary.associations_written = update.successful;
        summary.failed += update.failed;
        summary.skipped += update.skipped;
        summary.validation_failures += update.validation_failures;
    }
    if let Some(repair) = &state.repair {
        summary.versions_created = repair.created;
        summary.failed += repair.failed;
        summary.skipped += repair.skipped;
    }
    let found = summary.orphaned_found + summary.zombies_found;
    summary.success_rate = if found == 0 {
        1.0
    } else {
        (summary.associations_written + summary.versions_created) as f64 / found as f64
    };
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_start_in_order_only() {
        let mut tracker = StepTracker::new();
        let err = tracker.start(StepId::Identify).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition(_)));

        tracker.start(StepId::PreValidation).unwrap();
        tracker.complete(StepId::PreValidation, Value::Null).unwrap();
        tracker.start(StepId::Identify).unwrap();
        tracker.complete(StepId::Identify, Value::Null).unwrap();
        tracker.skip(StepId::Backup, "skipped by caller").unwrap();
        tracker.start(StepId::ResolveUpdate).unwrap();
        assert_eq!(tracker.status(StepId::ResolveUpdate), StepStatus::Running);
    }

    #[test]
    fn terminal_states_are_final() {
        let mut tracker = StepTracker::new();
        tracker.start(StepId::PreValidation).unwrap();
        tracker.complete(StepId::PreValidation, Value::Null).unwrap();
        assert!(tracker.start(StepId::PreValidation).is_err());
        assert!(tracker.complete(StepId::PreValidation, Value::Null).is_err());
        assert!(tracker.skip(StepId::PreValidation, "late").is_err());
    }

    #[test]
    fn failure_flags_rollback_and_skips_the_rest() {
        let mut tracker = StepTracker::new();
        for step in [
            StepId::PreValidation,
            StepId::Identify,
            StepId::Backup,
            StepId::ResolveUpdate,
        ] {
            tracker.start(step).unwrap();
            tracker.complete(step, Value::Null).unwrap();
        }
        tracker.start(StepId::ApplyConstraints).unwrap();
        tracker
            .fail(StepId::ApplyConstraints, "trigger rejected".into(), None)
            .unwrap();

        assert_eq!(tracker.status(StepId::PostValidation), StepStatus::Skipped);
        assert_eq!(
            tracker.rollback_candidates(),
            vec![StepId::ResolveUpdate, StepId::ApplyConstraints]
        );
        assert!(tracker.start(StepId::PostValidation).is_err());
    }

    #[test]
    fn failure_before_writes_needs_no_rollback() {
        let mut tracker = StepTracker::new();
        tracker.start(StepId::PreValidation).unwrap();
        tracker.fail(StepId::PreValidation, "too many".into(), None).unwrap();
        assert!(tracker.rollback_candidates().is_empty());
        assert!(
            tracker.steps()[1..]
                .iter()
                .all(|s| s.status == StepStatus::Skipped)
        );
    }

    #[test]
    fn cancel_handle_is_shared() {
        let handle = CancelHandle::new();
        let clone = handle.clone();
        assert!(!handle.is_cancelled());
        clone.cancel();
        assert!(handle.is_cancelled());
    }

    #[test]
    fn exit_code_requires_clean_success() {
        let report = RunReport {
            run_id: RunId::new(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            dry_run: false,
            status: RunStatus::Success,
            error: None,
            retryable: false,
            steps: Vec::new(),
            rollback_candidates: Vec::new(),
            summary: RunSummary::default(),
            backup: None,
            constraints: Vec::new(),
            resolutions: Vec::new(),
            update: None,
            repair: None,
        };
        assert_eq!(report.exit_code(), 0);

        let with_failures = RunReport {
            summary: RunSummary {
                failed: 1,
                ..RunSummary::default()
            },
            ..report.clone()
        };
        assert_eq!(with_failures.exit_code(), 1);

        let cancelled = RunReport {
            status: RunStatus::Cancelled,
            ..report
        };
        assert_eq!(cancelled.exit_code(), 1);
    }
}
