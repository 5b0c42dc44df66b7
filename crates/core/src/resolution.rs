use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::*;

/// Trust level of an automated association decision.
///
/// Variants are declared lowest first so the derived ordering can be used
/// as a confidence gate (`Failed < Low < Medium < High`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Failed,
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Failed => "failed",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "failed" => Ok(Self::Failed),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(CoreError::UnknownVariant {
                kind: "confidence level",
                value: other.to_string(),
            }),
        }
    }

    pub fn meets(&self, minimum: Confidence) -> bool {
        *self != Confidence::Failed && *self >= minimum
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which strategy produced a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    DirectSingle,
    DirectRanked,
    TemporalWindow,
    Fallback,
    NoCompetitor,
    NoProjects,
    Error,
}

impl ResolutionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DirectSingle => "direct_single",
            Self::DirectRanked => "direct_ranked",
            Self::TemporalWindow => "temporal_window",
            Self::Fallback => "fallback",
            Self::NoCompetitor => "no_competitor",
            Self::NoProjects => "no_projects",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub report_id: ReportId,
    pub competitor_id: Option<CompetitorId>,
    pub resolved_project_id: Option<ProjectId>,
    pub confidence: Confidence,
    pub method: ResolutionMethod,
    pub reason: String,
    pub resolved_at: DateTime<Utc>,
}

impl Resolution {
    pub fn resolved(
        report_id: ReportId,
        competitor_id: CompetitorId,
        project_id: ProjectId,
        confidence: Confidence,
        method: ResolutionMethod,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            report_id,
            competitor_id: Some(competitor_id),
            resolved_project_id: Some(project_id),
            confidence,
            method,
            reason: reason.into(),
            resolved_at: Utc::now(),
        }
    }

    pub fn failed(
        report_id: ReportId,
        competitor_id: Option<CompetitorId>,
        method: ResolutionMethod,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            report_id,
            competitor_id,
            resolved_project_id: None,
            confidence: Confidence::Failed,
            method,
            reason: reason.into(),
            resolved_at: Utc::now(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_project_id.is_some() && self.confidence != Confidence::Failed
    }
}
