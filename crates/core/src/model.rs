use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectStatus {
    Active,
    Draft,
    Paused,
    Archived,
    Completed,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Draft => "DRAFT",
            Self::Paused => "PAUSED",
            Self::Archived => "ARCHIVED",
            Self::Completed => "COMPLETED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "DRAFT" => Ok(Self::Draft),
            "PAUSED" => Ok(Self::Paused),
            "ARCHIVED" => Ok(Self::Archived),
            "COMPLETED" => Ok(Self::Completed),
            _ => Err(CoreError::UnknownVariant {
                kind: "project status",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl ProjectPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Urgent => "URGENT",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            "URGENT" => Ok(Self::Urgent),
            _ => Err(CoreError::UnknownVariant {
                kind: "project priority",
                value: s.to_string(),
            }),
        }
    }

    /// Higher rank wins when ordering candidate projects.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
            Self::Urgent => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    Draft,
    Queued,
    Generating,
    Completed,
    Failed,
    Archived,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Queued => "QUEUED",
            Self::Generating => "GENERATING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Archived => "ARCHIVED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "DRAFT" => Ok(Self::Draft),
            "QUEUED" => Ok(Self::Queued),
            "GENERATING" => Ok(Self::Generating),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "ARCHIVED" => Ok(Self::Archived),
            _ => Err(CoreError::UnknownVariant {
                kind: "report status",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Competitor {
    pub id: CompetitorId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub status: ProjectStatus,
    pub priority: ProjectPriority,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub competitor_ids: Vec<CompetitorId>,
}

impl Project {
    pub fn is_linked_to(&self, competitor_id: CompetitorId) -> bool {
        self.competitor_ids.contains(&competitor_id)
    }
}

/// Report row without any version content. Scans only ever return these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub id: ReportId,
    pub name: String,
    pub status: ReportStatus,
    pub competitor_id: Option<CompetitorId>,
    pub project_id: Option<ProjectId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReportSummary {
    pub fn is_orphaned(&self) -> bool {
        self.project_id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportVersion {
    pub id: VersionId,
    pub report_id: ReportId,
    pub version: u32,
    pub content: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSchedule {
    pub id: ScheduleId,
    pub report_id: ReportId,
    pub frequency: String,
    pub next_run_at: Option<DateTime<Utc>>,
    pub enabled: bool,
}

/// Data-quality facts recorded when a report was generated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityMetadata {
    pub report_id: ReportId,
    pub completeness_score: u8,
    pub freshness: String,
    pub snapshot_count: u32,
    pub captured_at: DateTime<Utc>,
}

/// A report is viewable iff at least one version carries content.
pub fn is_viewable(versions: &[ReportVersion]) -> bool {
    versions.iter().any(|v| v.content.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_roundtrip() {
        for status in [
            ProjectStatus::Active,
            ProjectStatus::Draft,
            ProjectStatus::Paused,
            ProjectStatus::Archived,
            ProjectStatus::Completed,
        ] {
            assert_eq!(ProjectStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(ReportStatus::parse("completed").is_err());
    }

    #[test]
    fn priority_rank_is_ordered() {
        assert!(ProjectPriority::Urgent.rank() > ProjectPriority::High.rank());
        assert!(ProjectPriority::High.rank() > ProjectPriority::Medium.rank());
        assert!(ProjectPriority::Medium.rank() > ProjectPriority::Low.rank());
    }

    #[test]
    fn viewable_requires_content() {
        let report_id = ReportId::new();
        let empty = ReportVersion {
            id: VersionId::new(),
            report_id,
            version: 1,
            content: None,
            created_at: Utc::now(),
        };
        assert!(!is_viewable(&[]));
        assert!(!is_viewable(std::slice::from_ref(&empty)));

        let filled = ReportVersion {
            content: Some(serde_json::json!({"summary": "ok"})),
            version: 2,
            ..empty.clone()
        };
        assert!(is_viewable(&[empty, filled]));
    }
}
