//! Replacement content for reports marked complete without any version.
//!
//! Synthesized payloads only restate what the store already knows about the
//! report (ids, names, timestamps, counts) plus generic remediation steps.
//! They always carry `emergency` and `recoveryVersion` markers.

use chrono::{DateTime, Utc};
use recon_core::{
    Competitor, Project, QualityMetadata, ReportId, ReportSummary, ReportVersion, VersionId,
};
use recon_storage::{Storage, StorageError};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::batch::{BatchRunner, ItemOutcome};
use crate::error::EngineError;
use crate::updater::UpdateErrorRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisTier {
    Full,
    Minimal,
    MetadataOnly,
}

impl SynthesisTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Minimal => "minimal",
            Self::MetadataOnly => "metadata_only",
        }
    }

    /// Out of 100. Kept low so nobody mistakes the content for real analysis.
    pub fn confidence_score(&self) -> u8 {
        match self {
            Self::Full => 25,
            Self::Minimal => 10,
            Self::MetadataOnly => 5,
        }
    }
}

/// What the store knows about a zombie report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisContext {
    pub report: ReportSummary,
    pub competitor: Option<Competitor>,
    pub project: Option<Project>,
    pub quality: Option<QualityMetadata>,
    pub schedule_count: usize,
}

impl SynthesisContext {
    pub fn load<S: Storage>(storage: &S, report: &ReportSummary) -> Result<Self, StorageError> {
        let competitor = match report.competitor_id {
            Some(id) => storage.get_competitor(id)?,
            None => None,
        };
        let project = match report.project_id {
            Some(id) => storage.get_project(id)?,
            None => None,
        };
        Ok(Self {
            report: report.clone(),
            competitor,
            project,
            quality: storage.get_quality(report.id)?,
            schedule_count: storage.get_schedules(report.id)?.len(),
        })
    }

    pub fn tier(&self) -> SynthesisTier {
        match (&self.project, &self.quality) {
            (Some(_), Some(_)) => SynthesisTier::Full,
            (Some(_), None) => SynthesisTier::Minimal,
            _ => SynthesisTier::MetadataOnly,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedContent {
    pub tier: SynthesisTier,
    pub content: Value,
}

const NOTICE: &str = "Recovery artifact. The original content of this report could not be \
    recovered; this version was generated automatically from stored metadata and contains \
    no competitive analysis.";

fn next_steps() -> Value {
    json!([
        "Regenerate the report from its data sources to replace this recovery version.",
        "Check the report's schedule and the generation pipeline logs for the original failure.",
        "Treat any decision based on this report as unsupported until it is regenerated.",
    ])
}

pub fn synthesize(ctx: &SynthesisContext, generated_at: DateTime<Utc>) -> SynthesizedContent {
    let tier = ctx.tier();
    let report = &ctx.report;

    let mut content = json!({
        "title": format!("{} (recovery version)", report.name),
        "emergency": true,
        "recoveryVersion": true,
        "tier": tier.as_str(),
        "confidenceScore": tier.confidence_score(),
        "generatedAt": generated_at,
        "notice": NOTICE,
        "report": {
            "id": report.id,
            "name": report.name,
            "status": report.status.as_str(),
            "createdAt": report.created_at,
            "updatedAt": report.updated_at,
            "scheduleCount": ctx.schedule_count,
        },
    });

    if let Some(competitor) = &ctx.competitor {
        content["competitor"] = json!({ "id": competitor.id, "name": competitor.name });
    }

    let mut sections = Vec::new();
    if let Some(project) = &ctx.project {
        content["project"] = json!({
            "id": project.id,
            "name": project.name,
            "status": project.status.as_str(),
            "priority": project.priority.as_str(),
        });
        sections.push(json!({
            "heading": "Summary",
            "body": format!(
                "Report \"{}\" belongs to project \"{}\" and was created {}. Its content is unavailable.",
                report.name,
                project.name,
                report.created_at.to_rfc3339()
            ),
        }));
    }
    if let Some(quality) = &ctx.quality {
        if tier == SynthesisTier::Full {
            content["quality"] = json!({
                "completenessScore": quality.completeness_score,
                "freshness": quality.freshness,
                "snapshotCount": quality.snapshot_count,
                "capturedAt": quality.captured_at,
            });
            sections.push(json!({
                "heading": "Data quality at generation time",
                "body": format!(
                    "Completeness {}/100, freshness {}, {} snapshot(s), captured {}.",
                    quality.completeness_score,
                    quality.freshness,
                    quality.snapshot_count,
                    quality.captured_at.to_rfc3339()
                ),
            }));
        }
    }
    sections.push(json!({ "heading": "Next steps", "body": next_steps() }));
    content["sections"] = Value::Array(sections);

    SynthesizedContent { tier, content }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairOptions {
    pub batch_size: usize,
    pub continue_on_error: bool,
    pub dry_run: bool,
}

impl Default for RepairOptions {
    fn default() -> Self {
        Self {
            batch_size: 10,
            continue_on_error: true,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairSummary {
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
    pub full: usize,
    pub minimal: usize,
    pub metadata_only: usize,
    pub repaired: Vec<ReportId>,
    pub errors: Vec<UpdateErrorRecord>,
    pub stopped: bool,
    pub dry_run: bool,
}

impl RepairSummary {
    fn count_tier(&mut self, tier: SynthesisTier) {
        match tier {
            SynthesisTier::Full => self.full += 1,
            SynthesisTier::Minimal => self.minimal += 1,
            SynthesisTier::MetadataOnly => self.metadata_only += 1,
        }
    }
}

struct Prepared {
    report_id: ReportId,
    version: Result<(SynthesisTier, ReportVersion), String>,
}

/// Gives each zombie report a synthesized version 1.
pub struct ZombieRepairer<'a, S: Storage> {
    storage: &'a S,
}

impl<'a, S: Storage> ZombieRepairer<'a, S> {
    pub fn new(storage: &'a S) -> Self {
        Self { storage }
    }

    pub fn repair_zombies(
        &self,
        zombies: &[ReportSummary],
        options: &RepairOptions,
    ) -> Result<RepairSummary, EngineError> {
        if options.batch_size == 0 {
            return Err(EngineError::Validation("batch size must be at least 1".into()));
        }

        // Context is read before any transaction opens; the store holds one writer at a time.
        let now = Utc::now();
        let prepared: Vec<Prepared> = zombies
            .iter()
            .map(|report| Prepared {
                report_id: report.id,
                version: SynthesisContext::load(self.storage, report)
                    .map(|ctx| {
                        let synthesized = synthesize(&ctx, now);
                        let version = ReportVersion {
                            id: VersionId::new(),
                            report_id: report.id,
                            version: 1,
                            content: Some(synthesized.content),
                            created_at: now,
                        };
                        (synthesized.tier, version)
                    })
                    .map_err(|e| e.to_string()),
            })
            .collect();

        let runner = BatchRunner::new(
            self.storage,
            options.batch_size,
            options.continue_on_error,
            options.dry_run,
        );
        let run = runner.run(&prepared, |p| p.report_id, |writer, item| {
            let (tier, version) = match &item.version {
                Ok(v) => v,
                Err(e) => return ItemOutcome::Failed(e.clone()),
            };
            match writer.count_versions(item.report_id) {
                Ok(0) => {}
                Ok(n) => return ItemOutcome::Skipped(format!("report already has {n} version(s)")),
                Err(e) => return ItemOutcome::Failed(e.to_string()),
            }
            match writer.insert_version(version) {
                Ok(()) => ItemOutcome::Done(*tier),
                Err(e) => ItemOutcome::Failed(e.to_string()),
            }
        });

        let mut summary = RepairSummary {
            stopped: run.stopped,
            dry_run: options.dry_run,
            ..RepairSummary::default()
        };
        for record in run.records {
            match record.outcome {
                ItemOutcome::Done(tier) => {
                    summary.created += 1;
                    summary.count_tier(tier);
                    summary.repaired.push(record.report_id);
                    tracing::info!(
                        report_id = %record.report_id,
                        tier = tier.as_str(),
                        dry_run = options.dry_run,
                        "synthesized recovery version"
                    );
                }
                ItemOutcome::Skipped(_) => summary.skipped += 1,
                ItemOutcome::Rejected(error) | ItemOutcome::Failed(error) => {
                    summary.failed += 1;
                    summary.errors.push(UpdateErrorRecord {
                        report_id: record.report_id,
                        error,
                        timestamp: record.at,
                    });
                }
            }
        }
        Ok(summary)
    }
}
