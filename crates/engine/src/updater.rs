use chrono::{DateTime, Utc};
use recon_core::{CompetitorId, Confidence, ProjectId, ReportId, Resolution};
use recon_storage::Storage;
use serde::{Deserialize, Serialize};

use crate::batch::{BatchRunner, BatchWriter, ItemOutcome};
use crate::config::UpdaterConfig;
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOptions {
    pub min_confidence: Confidence,
    pub batch_size: usize,
    pub continue_on_error: bool,
    pub dry_run: bool,
    pub validate_relationships: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self::from_config(&UpdaterConfig::default(), false)
    }
}

impl UpdateOptions {
    pub fn from_config(config: &UpdaterConfig, dry_run: bool) -> Self {
        Self {
            min_confidence: config.min_confidence,
            batch_size: config.batch_size,
            continue_on_error: config.continue_on_error,
            dry_run,
            validate_relationships: config.validate_relationships,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateErrorRecord {
    pub report_id: ReportId,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedChange {
    pub report_id: ReportId,
    pub competitor_id: CompetitorId,
    pub previous_project_id: Option<ProjectId>,
    pub new_project_id: ProjectId,
}

/// Per-run tally. Every input resolution lands in exactly one of
/// `successful`, `failed`, `skipped` or `validation_failures`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSummary {
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub validation_failures: usize,
    pub errors: Vec<UpdateErrorRecord>,
    pub applied: Vec<AppliedChange>,
    pub batches_committed: usize,
    /// Stop-on-error fired; later items were not attempted.
    pub stopped: bool,
    pub dry_run: bool,
}

impl UpdateSummary {
    pub fn total(&self) -> usize {
        self.successful + self.failed + self.skipped + self.validation_failures
    }

    /// Competitors whose projects gained or lost a report.
    pub fn touched_competitors(&self) -> Vec<CompetitorId> {
        let mut ids: Vec<CompetitorId> = self.applied.iter().map(|c| c.competitor_id).collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// Writes resolved project associations back onto reports.
pub struct BatchUpdater<'a, S: Storage> {
    storage: &'a S,
}

impl<'a, S: Storage> BatchUpdater<'a, S> {
    pub fn new(storage: &'a S) -> Self {
        Self { storage }
    }

    pub fn update(
        &self,
        resolutions: &[Resolution],
        options: &UpdateOptions,
    ) -> Result<UpdateSummary, EngineError> {
        if options.batch_size == 0 {
            return Err(EngineError::Validation("batch size must be at least 1".into()));
        }

        let mut summary = UpdateSummary {
            dry_run: options.dry_run,
            ..UpdateSummary::default()
        };

        let mut eligible = Vec::with_capacity(resolutions.len());
        for resolution in resolutions {
            if resolution.is_resolved() && resolution.confidence.meets(options.min_confidence) {
                eligible.push(resolution);
            } else {
                tracing::debug!(
                    report_id = %resolution.report_id,
                    confidence = resolution.confidence.as_str(),
                    minimum = options.min_confidence.as_str(),
                    "below confidence gate, skipping"
                );
                summary.skipped += 1;
            }
        }

        let runner = BatchRunner::new(
            self.storage,
            options.batch_size,
            options.continue_on_error,
            options.dry_run,
        );
        let run = runner.run(
            &eligible,
            |r| r.report_id,
            |writer, r| apply_one(writer, r, options.validate_relationships),
        );

        summary.batches_committed = run.batches_committed;
        summary.stopped = run.stopped;
        for record in run.records {
            match record.outcome {
                ItemOutcome::Done(change) => {
                    summary.successful += 1;
                    summary.applied.push(change);
                }
                ItemOutcome::Skipped(_) => summary.skipped += 1,
                ItemOutcome::Rejected(error) => {
                    summary.validation_failures += 1;
                    summary.errors.push(UpdateErrorRecord {
                        report_id: record.report_id,
                        error,
                        timestamp: record.at,
                    });
                }
                ItemOutcome::Failed(error) => {
                    summary.failed += 1;
                    summary.errors.push(UpdateErrorRecord {
                        report_id: record.report_id,
                        error,
                        timestamp: record.at,
                    });
                }
            }
        }

        tracing::info!(
            successful = summary.successful,
            failed = summary.failed,
            skipped = summary.skipped,
            validation_failures = summary.validation_failures,
            batches = summary.batches_committed,
            dry_run = summary.dry_run,
            "update complete"
        );
        Ok(summary)
    }
}

fn apply_one(
    writer: &mut dyn BatchWriter,
    resolution: &Resolution,
    validate_relationships: bool,
) -> ItemOutcome<AppliedChange> {
    let (Some(project_id), Some(competitor_id)) =
        (resolution.resolved_project_id, resolution.competitor_id)
    else {
        return ItemOutcome::Skipped("resolution has no target".into());
    };

    if validate_relationships {
        match writer.report_competitor(resolution.report_id) {
            Ok(Some(current)) if current == competitor_id => {}
            Ok(current) => {
                let now = current.map_or_else(|| "none".to_string(), |c| c.to_string());
                return ItemOutcome::Rejected(format!(
                    "report competitor changed from {competitor_id} to {now} since resolution"
                ));
            }
            Err(e) => return ItemOutcome::Failed(failure(resolution.report_id, e.to_string())),
        }
        match writer.project_has_competitor(project_id, competitor_id) {
            Ok(true) => {}
            Ok(false) => {
                return ItemOutcome::Rejected(format!(
                    "project {project_id} is no longer linked to competitor {competitor_id}"
                ));
            }
            Err(e) => return ItemOutcome::Failed(failure(resolution.report_id, e.to_string())),
        }
    }

    match writer.update_report_project(resolution.report_id, Some(project_id)) {
        Ok(previous_project_id) => ItemOutcome::Done(AppliedChange {
            report_id: resolution.report_id,
            competitor_id,
            previous_project_id,
            new_project_id: project_id,
        }),
        Err(e) => ItemOutcome::Failed(failure(resolution.report_id, e.to_string())),
    }
}

fn failure(report_id: ReportId, message: String) -> String {
    EngineError::Update { report_id, message }.to_string()
}
