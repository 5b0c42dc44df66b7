use recon_core::{ReportId, ReportSummary};
use recon_storage::{ReportFilter, Storage};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub orphaned: Vec<ReportSummary>,
    pub zombies: Vec<ReportSummary>,
    /// Reports with versions but no content; reported, never repaired.
    pub unviewable: Vec<ReportSummary>,
}

impl ScanSummary {
    pub fn anomaly_count(&self) -> usize {
        self.orphaned.len() + self.zombies.len()
    }

    pub fn is_clean(&self) -> bool {
        self.anomaly_count() == 0
    }
}

/// Read-only detection of orphaned and zombie reports.
pub struct AnomalyScanner<'a, S: Storage> {
    storage: &'a S,
}

impl<'a, S: Storage> AnomalyScanner<'a, S> {
    pub fn new(storage: &'a S) -> Self {
        Self { storage }
    }

    /// Reports with no project association.
    pub fn find_orphaned(
        &self,
        scope: Option<ReportId>,
    ) -> Result<Vec<ReportSummary>, EngineError> {
        self.find(ReportFilter::orphaned().scoped(scope), "orphaned")
    }

    /// COMPLETED reports that have zero versions.
    pub fn find_zombies(&self, scope: Option<ReportId>) -> Result<Vec<ReportSummary>, EngineError> {
        self.find(ReportFilter::zombies().scoped(scope), "zombie")
    }

    pub fn find_unviewable(
        &self,
        scope: Option<ReportId>,
    ) -> Result<Vec<ReportSummary>, EngineError> {
        let filter = ReportFilter {
            without_content: true,
            ..ReportFilter::default()
        }
        .scoped(scope);
        self.find(filter, "unviewable")
    }

    pub fn count_orphaned(&self, scope: Option<ReportId>) -> Result<u64, EngineError> {
        self.storage
            .count_reports(&ReportFilter::orphaned().scoped(scope))
            .map_err(EngineError::Scan)
    }

    pub fn count_zombies(&self, scope: Option<ReportId>) -> Result<u64, EngineError> {
        self.storage
            .count_reports(&ReportFilter::zombies().scoped(scope))
            .map_err(EngineError::Scan)
    }

    pub fn scan(&self, scope: Option<ReportId>) -> Result<ScanSummary, EngineError> {
        let summary = ScanSummary {
            orphaned: self.find_orphaned(scope)?,
            zombies: self.find_zombies(scope)?,
            unviewable: self.find_unviewable(scope)?,
        };
        tracing::info!(
            orphaned = summary.orphaned.len(),
            zombies = summary.zombies.len(),
            unviewable = summary.unviewable.len(),
            "scan complete"
        );
        Ok(summary)
    }

    fn find(&self, filter: ReportFilter, kind: &str) -> Result<Vec<ReportSummary>, EngineError> {
        match self.storage.find_reports(&filter) {
            Ok(reports) => {
                tracing::debug!(kind, count = reports.len(), "scanned reports");
                Ok(reports)
            }
            Err(e) => {
                tracing::error!(kind, error = %e, "scan failed");
                Err(EngineError::Scan(e))
            }
        }
    }
}
