//! Durable snapshots of the rows a run is about to change.
//!
//! An artifact is a single JSON document, optionally zstd-compressed:
//!
//! ```json
//! { "timestamp": "...", "correlationId": "...", "format": "structured",
//!   "recordCount": 2, "checksum": "<blake3 hex>", "records": [ ... ] }
//! ```
//!
//! The checksum covers the canonical JSON encoding of `records` (object keys
//! sorted, no whitespace), so the document can be verified without this crate.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use recon_core::{QualityMetadata, ReportId, ReportSchedule, ReportSummary, ReportVersion};
use recon_storage::Storage;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];
const ZSTD_LEVEL: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupFormat {
    /// One record per row, tagged with its table.
    RawJson,
    /// One record per report with its versions, schedules and quality nested.
    Structured,
}

impl BackupFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RawJson => "raw-json",
            Self::Structured => "structured",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", content = "row", rename_all = "snake_case")]
pub enum RawRow {
    Reports(ReportSummary),
    ReportVersions(ReportVersion),
    ReportSchedules(ReportSchedule),
    ReportQuality(QualityMetadata),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSnapshot {
    pub report: ReportSummary,
    pub versions: Vec<ReportVersion>,
    pub schedules: Vec<ReportSchedule>,
    pub quality: Option<QualityMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BackupRecord {
    Row(RawRow),
    Report(ReportSnapshot),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupDocument {
    pub timestamp: DateTime<Utc>,
    pub correlation_id: String,
    pub format: BackupFormat,
    pub record_count: usize,
    pub checksum: String,
    pub records: Vec<BackupRecord>,
}

impl BackupDocument {
    /// Reports covered by the snapshot, in record order.
    pub fn reports(&self) -> Vec<&ReportSummary> {
        self.records
            .iter()
            .filter_map(|r| match r {
                BackupRecord::Report(s) => Some(&s.report),
                BackupRecord::Row(RawRow::Reports(report)) => Some(report),
                BackupRecord::Row(_) => None,
            })
            .collect()
    }

    pub fn versions(&self) -> Vec<&ReportVersion> {
        self.records
            .iter()
            .flat_map(|r| match r {
                BackupRecord::Report(s) => s.versions.iter().collect::<Vec<_>>(),
                BackupRecord::Row(RawRow::ReportVersions(v)) => vec![v],
                BackupRecord::Row(_) => Vec::new(),
            })
            .collect()
    }

    /// Recomputes checksum and record count against the header.
    pub fn check(&self) -> Result<(), EngineError> {
        if self.record_count != self.records.len() {
            return Err(EngineError::Backup(format!(
                "record count mismatch: header says {}, found {}",
                self.record_count,
                self.records.len()
            )));
        }
        let actual = checksum(&self.records)?;
        if actual != self.checksum {
            return Err(EngineError::Backup(format!(
                "checksum mismatch: header {}, computed {actual}",
                self.checksum
            )));
        }
        Ok(())
    }
}

pub fn checksum(records: &[BackupRecord]) -> Result<String, EngineError> {
    // Through Value so object keys come out sorted.
    let canonical = serde_json::to_vec(&serde_json::to_value(records)?)?;
    Ok(blake3::hash(&canonical).to_hex().to_string())
}

/// Parses artifact bytes, decompressing when they start with a zstd frame.
pub fn decode(bytes: &[u8]) -> Result<BackupDocument, EngineError> {
    if bytes.starts_with(&ZSTD_MAGIC) {
        let raw = zstd::decode_all(bytes)?;
        Ok(serde_json::from_slice(&raw)?)
    } else {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Reads and verifies an artifact straight from disk.
pub fn load(path: &Path) -> Result<BackupDocument, EngineError> {
    let document = decode(&fs::read(path)?)?;
    document.check()?;
    Ok(document)
}

/// Destination for backup artifacts.
pub trait BackupSink: Send + Sync {
    /// Fails when artifacts cannot currently be written.
    fn check_writable(&self) -> Result<(), EngineError>;

    /// Durably stores `bytes` and returns where they went.
    fn write(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, EngineError>;

    fn read(&self, path: &Path) -> Result<Vec<u8>, EngineError>;
}

pub struct FileBackupSink {
    dir: PathBuf,
}

impl FileBackupSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl BackupSink for FileBackupSink {
    fn check_writable(&self) -> Result<(), EngineError> {
        let dir = self.dir.display();
        fs::create_dir_all(&self.dir)
            .map_err(|e| EngineError::Backup(format!("cannot create {dir}: {e}")))?;
        let marker = self.dir.join(".write-check");
        fs::write(&marker, b"ok")
            .map_err(|e| EngineError::Backup(format!("{dir} is not writable: {e}")))?;
        fs::remove_file(&marker)?;
        Ok(())
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, EngineError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(name);
        let partial = self.dir.join(format!("{name}.partial"));
        let mut file = fs::File::create(&partial)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&partial, &path)?;
        Ok(path)
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>, EngineError> {
        Ok(fs::read(path)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupOptions {
    pub format: BackupFormat,
    pub compress: bool,
    pub correlation_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupArtifact {
    pub path: PathBuf,
    pub checksum: String,
    pub record_count: usize,
    pub format: BackupFormat,
    pub compressed: bool,
    pub correlation_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreSummary {
    pub reports_reset: usize,
    pub versions_deleted: usize,
}

pub fn artifact_name(correlation_id: &str, at: DateTime<Utc>, compressed: bool) -> String {
    let stamp = at.format("%Y%m%dT%H%M%S%3fZ");
    if compressed {
        format!("backup-{correlation_id}-{stamp}.json.zst")
    } else {
        format!("backup-{correlation_id}-{stamp}.json")
    }
}

pub struct BackupService<'a, S: Storage> {
    storage: &'a S,
    sink: &'a dyn BackupSink,
}

impl<'a, S: Storage> BackupService<'a, S> {
    pub fn new(storage: &'a S, sink: &'a dyn BackupSink) -> Self {
        Self { storage, sink }
    }

    /// Writes and verifies a snapshot of `scope` and its child rows.
    pub fn snapshot(
        &self,
        scope: &[ReportId],
        options: &BackupOptions,
    ) -> Result<BackupArtifact, EngineError> {
        let records = self.collect(scope, options.format)?;
        let timestamp = Utc::now();
        let document = BackupDocument {
            timestamp,
            correlation_id: options.correlation_id.clone(),
            format: options.format,
            record_count: records.len(),
            checksum: checksum(&records)?,
            records,
        };

        let json = serde_json::to_vec_pretty(&document)?;
        let bytes = if options.compress {
            zstd::encode_all(json.as_slice(), ZSTD_LEVEL)?
        } else {
            json
        };
        let name = artifact_name(&options.correlation_id, timestamp, options.compress);
        let path = self.sink.write(&name, &bytes)?;

        let artifact = BackupArtifact {
            path,
            checksum: document.checksum,
            record_count: document.record_count,
            format: options.format,
            compressed: options.compress,
            correlation_id: options.correlation_id.clone(),
            created_at: timestamp,
        };
        self.verify(&artifact)?;
        tracing::info!(
            path = %artifact.path.display(),
            records = artifact.record_count,
            format = artifact.format.as_str(),
            compressed = artifact.compressed,
            "backup written"
        );
        Ok(artifact)
    }

    /// Reloads the artifact from the sink and checks it against its own header and `artifact`.
    pub fn verify(&self, artifact: &BackupArtifact) -> Result<BackupDocument, EngineError> {
        let document = decode(&self.sink.read(&artifact.path)?)?;
        document.check()?;
        if document.checksum != artifact.checksum
            || document.record_count != artifact.record_count
        {
            return Err(EngineError::Backup(format!(
                "artifact {} does not match the snapshot that was written",
                artifact.path.display()
            )));
        }
        Ok(document)
    }

    /// Puts every snapshotted report back on its backed-up project and drops
    /// versions created after the snapshot. One transaction.
    pub fn restore(&self, document: &BackupDocument) -> Result<RestoreSummary, EngineError> {
        document.check()?;
        let kept: HashSet<_> = document.versions().iter().map(|v| v.id).collect();
        let reports = document.reports();

        let mut extra = Vec::new();
        for report in &reports {
            for version in self.storage.get_versions(report.id)? {
                if !kept.contains(&version.id) {
                    extra.push(version.id);
                }
            }
        }

        let summary = self.storage.transaction(|tx| {
            for report in &reports {
                tx.update_report_project(report.id, report.project_id)?;
            }
            for version_id in &extra {
                tx.delete_version(*version_id)?;
            }
            Ok(RestoreSummary {
                reports_reset: reports.len(),
                versions_deleted: extra.len(),
            })
        })?;
        tracing::info!(
            correlation_id = %document.correlation_id,
            reports = summary.reports_reset,
            versions_deleted = summary.versions_deleted,
            "backup restored"
        );
        Ok(summary)
    }

    fn collect(
        &self,
        scope: &[ReportId],
        format: BackupFormat,
    ) -> Result<Vec<BackupRecord>, EngineError> {
        let mut records = Vec::new();
        for &report_id in scope {
            let Some(report) = self.storage.get_report(report_id)? else {
                tracing::warn!(report_id = %report_id, "report vanished before backup");
                continue;
            };
            let versions = self.storage.get_versions(report_id)?;
            let schedules = self.storage.get_schedules(report_id)?;
            let quality = self.storage.get_quality(report_id)?;
            match format {
                BackupFormat::Structured => records.push(BackupRecord::Report(ReportSnapshot {
                    report,
                    versions,
                    schedules,
                    quality,
                })),
                BackupFormat::RawJson => {
                    records.push(BackupRecord::Row(RawRow::Reports(report)));
                    let rows = versions
                        .into_iter()
                        .map(RawRow::ReportVersions)
                        .chain(schedules.into_iter().map(RawRow::ReportSchedules))
                        .chain(quality.into_iter().map(RawRow::ReportQuality));
                    records.extend(rows.map(BackupRecord::Row));
                }
            }
        }
        Ok(records)
    }
}
