//! Tiered project resolution for orphaned reports.
//!
//! Each strategy looks at the projects linked to the report's competitor and
//! either proposes one or passes. Strategies run in order; the first proposal
//! wins. Failures for one report never abort the others.

use chrono::Duration;
use rayon::prelude::*;
use recon_core::{
    CompetitorId, Confidence, Project, ProjectStatus, Resolution, ResolutionMethod, ReportSummary,
};
use recon_storage::Storage;
use serde::{Deserialize, Serialize};

use crate::config::ResolverConfig;
use crate::discovery::{PriorityRule, ProjectDiscovery, rank_projects};
use crate::error::EngineError;

pub const NO_COMPETITOR: &str = "no competitor associated";
pub const NO_PROJECTS_FOR_COMPETITOR: &str = "no projects found for competitor";

pub trait ResolutionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `candidates` are every project linked to `competitor_id`.
    fn attempt(
        &self,
        report: &ReportSummary,
        competitor_id: CompetitorId,
        candidates: &[Project],
    ) -> Option<Resolution>;
}

/// Projects linked to the competitor in ACTIVE or DRAFT state.
pub struct DirectRelationship {
    pub rule: PriorityRule,
}

impl ResolutionStrategy for DirectRelationship {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn attempt(
        &self,
        report: &ReportSummary,
        competitor_id: CompetitorId,
        candidates: &[Project],
    ) -> Option<Resolution> {
        let mut live: Vec<Project> = candidates
            .iter()
            .filter(|p| matches!(p.status, ProjectStatus::Active | ProjectStatus::Draft))
            .cloned()
            .collect();
        match live.len() {
            0 => None,
            1 => Some(Resolution::resolved(
                report.id,
                competitor_id,
                live[0].id,
                Confidence::High,
                ResolutionMethod::DirectSingle,
                format!("only active/draft project linked to competitor: {}", live[0].name),
            )),
            n => {
                // Most recently updated ACTIVE project wins. The rule only
                // ranks when every candidate is a draft.
                let active = live
                    .iter()
                    .filter(|p| p.status == ProjectStatus::Active)
                    .min_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)))
                    .cloned();
                let (picked, how) = match active {
                    Some(project) => (project, "most recently updated active project"),
                    None => {
                        rank_projects(&mut live, self.rule);
                        (live.swap_remove(0), self.rule.as_str())
                    }
                };
                Some(Resolution::resolved(
                    report.id,
                    competitor_id,
                    picked.id,
                    Confidence::Medium,
                    ResolutionMethod::DirectRanked,
                    format!(
                        "{n} active/draft projects linked to competitor, picked {} by {how}",
                        picked.name
                    ),
                ))
            }
        }
    }
}

/// Projects created within `window` of the report, most recent first.
pub struct TemporalWindow {
    pub window: Duration,
}

impl ResolutionStrategy for TemporalWindow {
    fn name(&self) -> &'static str {
        "temporal"
    }

    fn attempt(
        &self,
        report: &ReportSummary,
        competitor_id: CompetitorId,
        candidates: &[Project],
    ) -> Option<Resolution> {
        let from = report.created_at.checked_sub_signed(self.window)?;
        let to = report.created_at.checked_add_signed(self.window)?;
        let best = candidates
            .iter()
            .filter(|p| p.created_at >= from && p.created_at <= to)
            .min_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)))?;
        Some(Resolution::resolved(
            report.id,
            competitor_id,
            best.id,
            Confidence::Medium,
            ResolutionMethod::TemporalWindow,
            format!(
                "project {} created within {}h of report",
                best.name,
                self.window.num_hours()
            ),
        ))
    }
}

/// Any linked project, most recently updated.
pub struct Fallback;

impl ResolutionStrategy for Fallback {
    fn name(&self) -> &'static str {
        "fallback"
    }

    fn attempt(
        &self,
        report: &ReportSummary,
        competitor_id: CompetitorId,
        candidates: &[Project],
    ) -> Option<Resolution> {
        let best = candidates
            .iter()
            .min_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)))?;
        Some(Resolution::resolved(
            report.id,
            competitor_id,
            best.id,
            Confidence::Low,
            ResolutionMethod::Fallback,
            format!("most recently updated project linked to competitor: {}", best.name),
        ))
    }
}

pub fn default_strategies(
    rule: PriorityRule,
    temporal_window: Duration,
) -> Vec<Box<dyn ResolutionStrategy>> {
    vec![
        Box::new(DirectRelationship { rule }),
        Box::new(TemporalWindow {
            window: temporal_window,
        }),
        Box::new(Fallback),
    ]
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionStats {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub failed: usize,
}

impl ResolutionStats {
    pub fn from_resolutions(resolutions: &[Resolution]) -> Self {
        let mut stats = Self::default();
        for r in resolutions {
            match r.confidence {
                Confidence::High => stats.high += 1,
                Confidence::Medium => stats.medium += 1,
                Confidence::Low => stats.low += 1,
                Confidence::Failed => stats.failed += 1,
            }
        }
        stats
    }
}

pub struct AssociationResolver<'a, S: Storage> {
    discovery: ProjectDiscovery<'a, S>,
    strategies: Vec<Box<dyn ResolutionStrategy>>,
    workers: usize,
}

impl<'a, S: Storage> AssociationResolver<'a, S> {
    pub fn new(
        discovery: ProjectDiscovery<'a, S>,
        config: &ResolverConfig,
        rule: PriorityRule,
    ) -> Self {
        Self {
            discovery,
            strategies: default_strategies(rule, Duration::hours(config.temporal_window_hours)),
            workers: config.workers.max(1),
        }
    }

    pub fn with_strategies(
        discovery: ProjectDiscovery<'a, S>,
        strategies: Vec<Box<dyn ResolutionStrategy>>,
        workers: usize,
    ) -> Self {
        Self {
            discovery,
            strategies,
            workers: workers.max(1),
        }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// One resolution per input report, in input order.
    pub fn resolve(&self, reports: &[ReportSummary]) -> Vec<Resolution> {
        if self.workers == 1 || reports.len() < 2 {
            return reports.iter().map(|r| self.resolve_one(r)).collect();
        }
        match rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
        {
            Ok(pool) => pool.install(|| reports.par_iter().map(|r| self.resolve_one(r)).collect()),
            Err(e) => {
                tracing::warn!(error = %e, "resolver pool unavailable, resolving sequentially");
                reports.iter().map(|r| self.resolve_one(r)).collect()
            }
        }
    }

    pub fn resolve_one(&self, report: &ReportSummary) -> Resolution {
        match self.try_resolve(report) {
            Ok(resolution) => {
                tracing::debug!(
                    report_id = %report.id,
                    confidence = resolution.confidence.as_str(),
                    method = resolution.method.as_str(),
                    "resolved report"
                );
                resolution
            }
            Err(e) => {
                let err = EngineError::Resolution {
                    report_id: report.id,
                    message: e.to_string(),
                };
                tracing::warn!(report_id = %report.id, error = %err, "resolution failed");
                Resolution::failed(
                    report.id,
                    report.competitor_id,
                    ResolutionMethod::Error,
                    e.to_string(),
                )
            }
        }
    }

    fn try_resolve(&self, report: &ReportSummary) -> Result<Resolution, EngineError> {
        let Some(competitor_id) = report.competitor_id else {
            return Ok(Resolution::failed(
                report.id,
                None,
                ResolutionMethod::NoCompetitor,
                NO_COMPETITOR,
            ));
        };

        let candidates = self.discovery.find_projects_by_competitor(competitor_id)?;
        if candidates.is_empty() {
            return Ok(Resolution::failed(
                report.id,
                Some(competitor_id),
                ResolutionMethod::NoProjects,
                NO_PROJECTS_FOR_COMPETITOR,
            ));
        }

        for strategy in &self.strategies {
            if let Some(resolution) = strategy.attempt(report, competitor_id, &candidates) {
                return Ok(resolution);
            }
        }
        Ok(Resolution::failed(
            report.id,
            Some(competitor_id),
            ResolutionMethod::NoProjects,
            NO_PROJECTS_FOR_COMPETITOR,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use recon_core::{ProjectId, ProjectPriority, ReportId, ReportStatus};

    fn base() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000).unwrap()
    }

    fn project(
        id_byte: u8,
        status: ProjectStatus,
        created: DateTime<Utc>,
        updated: DateTime<Utc>,
    ) -> Project {
        Project {
            id: ProjectId::from_bytes([id_byte; 16]),
            name: format!("p{id_byte}"),
            status,
            priority: ProjectPriority::Medium,
            created_at: created,
            updated_at: updated,
            competitor_ids: Vec::new(),
        }
    }

    fn direct(rule: PriorityRule) -> DirectRelationship {
        DirectRelationship { rule }
    }

    fn report(competitor: Option<CompetitorId>) -> ReportSummary {
        ReportSummary {
            id: ReportId::new(),
            name: "r".into(),
            status: ReportStatus::Completed,
            competitor_id: competitor,
            project_id: None,
            created_at: base(),
            updated_at: base(),
        }
    }

    #[test]
    fn direct_single_is_high() {
        let c = CompetitorId::new();
        let only = project(1, ProjectStatus::Active, base(), base());
        let archived = project(2, ProjectStatus::Archived, base(), base() + Duration::hours(1));
        let r = direct(PriorityRule::ActiveFirst)
            .attempt(&report(Some(c)), c, &[only.clone(), archived])
            .unwrap();
        assert_eq!(r.confidence, Confidence::High);
        assert_eq!(r.resolved_project_id, Some(only.id));
        assert_eq!(r.method, ResolutionMethod::DirectSingle);
    }

    #[test]
    fn direct_many_prefers_active_and_is_medium() {
        let c = CompetitorId::new();
        let draft = project(1, ProjectStatus::Draft, base(), base() + Duration::hours(5));
        let active = project(2, ProjectStatus::Active, base(), base());
        let r = direct(PriorityRule::ActiveFirst)
            .attempt(&report(Some(c)), c, &[draft, active.clone()])
            .unwrap();
        assert_eq!(r.confidence, Confidence::Medium);
        assert_eq!(r.resolved_project_id, Some(active.id));
    }

    #[test]
    fn direct_many_active_picks_most_recently_updated() {
        let c = CompetitorId::new();
        let mut stale_high = project(1, ProjectStatus::Active, base(), base());
        stale_high.priority = ProjectPriority::High;
        let mut fresh_low = project(2, ProjectStatus::Active, base(), base() + Duration::hours(5));
        fresh_low.priority = ProjectPriority::Low;
        let r = direct(PriorityRule::ByPriority)
            .attempt(&report(Some(c)), c, &[stale_high, fresh_low.clone()])
            .unwrap();
        assert_eq!(r.confidence, Confidence::Medium);
        assert_eq!(r.method, ResolutionMethod::DirectRanked);
        assert_eq!(r.resolved_project_id, Some(fresh_low.id));
        assert!(r.reason.contains("most recently updated active"));
    }

    #[test]
    fn direct_many_drafts_fall_back_to_rule() {
        let c = CompetitorId::new();
        let mut old_high = project(1, ProjectStatus::Draft, base(), base());
        old_high.priority = ProjectPriority::High;
        let mut new_low = project(2, ProjectStatus::Draft, base(), base() + Duration::hours(5));
        new_low.priority = ProjectPriority::Low;
        let r = direct(PriorityRule::ByPriority)
            .attempt(&report(Some(c)), c, &[new_low, old_high.clone()])
            .unwrap();
        assert_eq!(r.resolved_project_id, Some(old_high.id));
        assert_eq!(r.confidence, Confidence::Medium);
    }

    #[test]
    fn direct_passes_without_live_projects() {
        let c = CompetitorId::new();
        let paused = project(1, ProjectStatus::Paused, base(), base());
        let r = direct(PriorityRule::ActiveFirst).attempt(&report(Some(c)), c, &[paused]);
        assert!(r.is_none());
    }

    #[test]
    fn temporal_window_bounds_are_inclusive() {
        let c = CompetitorId::new();
        let strategy = TemporalWindow {
            window: Duration::hours(24),
        };
        let at_edge = project(1, ProjectStatus::Paused, base() + Duration::hours(24), base());
        let r = strategy.attempt(&report(Some(c)), c, &[at_edge.clone()]).unwrap();
        assert_eq!(r.resolved_project_id, Some(at_edge.id));
        assert_eq!(r.confidence, Confidence::Medium);

        let before_edge = project(2, ProjectStatus::Paused, base() - Duration::hours(24), base());
        assert!(strategy.attempt(&report(Some(c)), c, &[before_edge]).is_some());

        let just_outside = project(
            3,
            ProjectStatus::Paused,
            base() + Duration::hours(24) + Duration::milliseconds(1),
            base(),
        );
        assert!(strategy.attempt(&report(Some(c)), c, &[just_outside]).is_none());
    }

    #[test]
    fn temporal_picks_most_recently_created() {
        let c = CompetitorId::new();
        let earlier = project(1, ProjectStatus::Archived, base() - Duration::hours(3), base());
        let later = project(2, ProjectStatus::Archived, base() + Duration::hours(2), base());
        let r = TemporalWindow {
            window: Duration::hours(24),
        }
        .attempt(&report(Some(c)), c, &[earlier, later.clone()])
        .unwrap();
        assert_eq!(r.resolved_project_id, Some(later.id));
    }

    #[test]
    fn temporal_window_past_the_calendar_passes() {
        let c = CompetitorId::new();
        let any = project(1, ProjectStatus::Archived, base(), base());
        let r = TemporalWindow {
            window: Duration::MAX,
        }
        .attempt(&report(Some(c)), c, &[any]);
        assert!(r.is_none());
    }

    #[test]
    fn fallback_is_never_high() {
        let c = CompetitorId::new();
        let stale = project(
            1,
            ProjectStatus::Archived,
            base() - Duration::days(90),
            base() - Duration::days(30),
        );
        let fresher = project(
            2,
            ProjectStatus::Completed,
            base() - Duration::days(90),
            base() - Duration::days(2),
        );
        let r = Fallback.attempt(&report(Some(c)), c, &[stale, fresher.clone()]).unwrap();
        assert_eq!(r.confidence, Confidence::Low);
        assert_eq!(r.resolved_project_id, Some(fresher.id));
        assert!(Fallback.attempt(&report(Some(c)), c, &[]).is_none());
    }

    #[test]
    fn stats_count_each_tier() {
        let c = CompetitorId::new();
        let p = ProjectId::new();
        let rid = ReportId::new();
        let resolutions = vec![
            Resolution::resolved(rid, c, p, Confidence::High, ResolutionMethod::DirectSingle, ""),
            Resolution::resolved(rid, c, p, Confidence::High, ResolutionMethod::DirectSingle, ""),
            Resolution::resolved(rid, c, p, Confidence::Low, ResolutionMethod::Fallback, ""),
            Resolution::failed(rid, None, ResolutionMethod::NoCompetitor, NO_COMPETITOR),
        ];
        let stats = ResolutionStats::from_resolutions(&resolutions);
        assert_eq!(
            stats,
            ResolutionStats {
                high: 2,
                medium: 0,
                low: 1,
                failed: 1,
            }
        );
    }
}
