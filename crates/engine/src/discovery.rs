//! Competitor → project lookup with a fail-open cache.
//!
//! Lookups are keyed by competitor. The cache is best-effort: a miss, a
//! stale entry or a cache error only costs an extra store query.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use recon_core::{CompetitorId, Project, ProjectId, ProjectStatus};
use recon_storage::{ProjectFilter, Storage};
use serde::Serialize;
use thiserror::Error;

use crate::error::EngineError;

pub const EMPTY_COMPETITOR_ID: &str = "Competitor ID is required and cannot be empty";
pub const NO_PROJECTS: &str = "No projects associated with this competitor";

#[derive(Debug, Error)]
#[error("cache error: {0}")]
pub struct CacheError(pub String);

pub type CachedProjects = Arc<Vec<Project>>;

/// Storage for competitor lookups. Implementations must tolerate concurrent use.
pub trait ProjectCache: Send + Sync {
    fn get(&self, competitor_id: CompetitorId) -> Result<Option<CachedProjects>, CacheError>;

    fn put(&self, competitor_id: CompetitorId, projects: CachedProjects) -> Result<(), CacheError>;

    fn invalidate(&self, competitor_id: CompetitorId) -> Result<(), CacheError>;

    fn clear(&self) -> Result<(), CacheError>;
}

/// In-process TTL cache backed by moka.
pub struct MokaProjectCache {
    cache: Cache<CompetitorId, CachedProjects>,
}

impl MokaProjectCache {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();
        Self { cache }
    }
}

impl ProjectCache for MokaProjectCache {
    fn get(&self, competitor_id: CompetitorId) -> Result<Option<CachedProjects>, CacheError> {
        Ok(self.cache.get(&competitor_id))
    }

    fn put(&self, competitor_id: CompetitorId, projects: CachedProjects) -> Result<(), CacheError> {
        self.cache.insert(competitor_id, projects);
        Ok(())
    }

    fn invalidate(&self, competitor_id: CompetitorId) -> Result<(), CacheError> {
        self.cache.invalidate(&competitor_id);
        Ok(())
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.cache.invalidate_all();
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityRule {
    /// ACTIVE first, then priority, then most recently updated.
    #[default]
    ActiveFirst,
    /// Priority, then most recently updated. Status is ignored.
    ByPriority,
    /// Most recently created.
    Newest,
}

impl PriorityRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ActiveFirst => "active_first",
            Self::ByPriority => "by_priority",
            Self::Newest => "newest",
        }
    }

    /// Unknown names fall back to `ActiveFirst`.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "active_first" => Self::ActiveFirst,
            "by_priority" => Self::ByPriority,
            "newest" => Self::Newest,
            other => {
                tracing::warn!(rule = other, "unknown priority rule, using active_first");
                Self::ActiveFirst
            }
        }
    }

    /// Total order; project id ascending breaks every remaining tie.
    pub fn compare(&self, a: &Project, b: &Project) -> Ordering {
        let by_rule = match self {
            Self::ActiveFirst => active_rank(b)
                .cmp(&active_rank(a))
                .then(b.priority.rank().cmp(&a.priority.rank()))
                .then(b.updated_at.cmp(&a.updated_at)),
            Self::ByPriority => b
                .priority
                .rank()
                .cmp(&a.priority.rank())
                .then(b.updated_at.cmp(&a.updated_at)),
            Self::Newest => b.created_at.cmp(&a.created_at),
        };
        by_rule.then(a.id.cmp(&b.id))
    }
}

fn active_rank(project: &Project) -> u8 {
    u8::from(project.status == ProjectStatus::Active)
}

/// Sorts candidates best-first under `rule`.
pub fn rank_projects(projects: &mut [Project], rule: PriorityRule) {
    projects.sort_by(|a, b| rule.compare(a, b));
}

#[derive(Debug, Clone, Default)]
pub struct DiscoveryOptions {
    pub priority_rule: PriorityRule,
    pub bypass_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryResult {
    pub success: bool,
    pub project_id: Option<ProjectId>,
    /// Candidates, best first.
    pub projects: Vec<Project>,
    pub error: Option<String>,
}

pub struct ProjectDiscovery<'a, S: Storage> {
    storage: &'a S,
    cache: &'a dyn ProjectCache,
}

impl<'a, S: Storage> ProjectDiscovery<'a, S> {
    pub fn new(storage: &'a S, cache: &'a dyn ProjectCache) -> Self {
        Self { storage, cache }
    }

    /// All projects linked to the competitor, most recently updated first.
    pub fn find_projects_by_competitor(
        &self,
        competitor_id: CompetitorId,
    ) -> Result<CachedProjects, EngineError> {
        self.lookup(competitor_id, false)
    }

    /// Validates a raw competitor id, then resolves it to one project.
    pub fn resolve(
        &self,
        competitor_id: &str,
        options: &DiscoveryOptions,
    ) -> Result<DiscoveryResult, EngineError> {
        let trimmed = competitor_id.trim();
        if trimmed.is_empty() {
            return Err(EngineError::Validation(EMPTY_COMPETITOR_ID.to_string()));
        }
        let competitor_id: CompetitorId = trimmed
            .parse()
            .map_err(|e: recon_core::CoreError| EngineError::Validation(e.to_string()))?;
        self.resolve_id(competitor_id, options)
    }

    pub fn resolve_id(
        &self,
        competitor_id: CompetitorId,
        options: &DiscoveryOptions,
    ) -> Result<DiscoveryResult, EngineError> {
        let mut projects = self.lookup(competitor_id, options.bypass_cache)?.to_vec();
        if projects.is_empty() {
            return Ok(DiscoveryResult {
                success: false,
                project_id: None,
                projects,
                error: Some(NO_PROJECTS.to_string()),
            });
        }
        rank_projects(&mut projects, options.priority_rule);
        let chosen = projects[0].id;
        if projects.len() > 1 {
            tracing::debug!(
                competitor_id = %competitor_id,
                candidates = projects.len(),
                rule = options.priority_rule.as_str(),
                project_id = %chosen,
                "picked project among several candidates"
            );
        }
        Ok(DiscoveryResult {
            success: true,
            project_id: Some(chosen),
            projects,
            error: None,
        })
    }

    pub fn invalidate_competitor(&self, competitor_id: CompetitorId) {
        if let Err(e) = self.cache.invalidate(competitor_id) {
            tracing::warn!(competitor_id = %competitor_id, error = %e, "cache invalidation failed");
        }
    }

    pub fn invalidate_all(&self) {
        if let Err(e) = self.cache.clear() {
            tracing::warn!(error = %e, "cache clear failed");
        }
    }

    fn lookup(
        &self,
        competitor_id: CompetitorId,
        bypass_cache: bool,
    ) -> Result<CachedProjects, EngineError> {
        if !bypass_cache {
            match self.cache.get(competitor_id) {
                Ok(Some(hit)) => return Ok(hit),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        competitor_id = %competitor_id,
                        error = %e,
                        "cache read failed, querying store"
                    );
                }
            }
        }

        let projects = Arc::new(
            self.storage
                .find_projects(&ProjectFilter::for_competitor(competitor_id))?,
        );

        if let Err(e) = self.cache.put(competitor_id, Arc::clone(&projects)) {
            tracing::warn!(competitor_id = %competitor_id, error = %e, "cache write failed");
        }
        Ok(projects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use recon_core::{Competitor, ProjectPriority};
    use recon_storage::SqliteStorage;

    struct BrokenCache;

    impl ProjectCache for BrokenCache {
        fn get(&self, _: CompetitorId) -> Result<Option<CachedProjects>, CacheError> {
            Err(CacheError("down".into()))
        }
        fn put(&self, _: CompetitorId, _: CachedProjects) -> Result<(), CacheError> {
            Err(CacheError("down".into()))
        }
        fn invalidate(&self, _: CompetitorId) -> Result<(), CacheError> {
            Err(CacheError("down".into()))
        }
        fn clear(&self) -> Result<(), CacheError> {
            Err(CacheError("down".into()))
        }
    }

    fn base() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000).unwrap()
    }

    fn project(
        id_byte: u8,
        status: ProjectStatus,
        priority: ProjectPriority,
        updated_mins: i64,
        competitor: CompetitorId,
    ) -> Project {
        Project {
            id: ProjectId::from_bytes([id_byte; 16]),
            name: format!("p{id_byte}"),
            status,
            priority,
            created_at: base() + ChronoDuration::minutes(id_byte as i64),
            updated_at: base() + ChronoDuration::minutes(updated_mins),
            competitor_ids: vec![competitor],
        }
    }

    fn store_with(projects: &[Project], competitor: CompetitorId) -> SqliteStorage {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage
            .insert_competitor(&Competitor {
                id: competitor,
                name: "Acme".into(),
            })
            .unwrap();
        for p in projects {
            storage.insert_project(p).unwrap();
        }
        storage
    }

    #[test]
    fn active_first_prefers_active_then_priority_then_recency() {
        let c = CompetitorId::new();
        let draft_urgent = project(1, ProjectStatus::Draft, ProjectPriority::Urgent, 50, c);
        let active_low = project(2, ProjectStatus::Active, ProjectPriority::Low, 10, c);
        let active_high_old = project(3, ProjectStatus::Active, ProjectPriority::High, 5, c);
        let active_high_new = project(4, ProjectStatus::Active, ProjectPriority::High, 20, c);

        let mut all = vec![
            draft_urgent.clone(),
            active_low.clone(),
            active_high_old.clone(),
            active_high_new.clone(),
        ];
        rank_projects(&mut all, PriorityRule::ActiveFirst);
        let order: Vec<_> = all.iter().map(|p| p.id).collect();
        assert_eq!(
            order,
            vec![active_high_new.id, active_high_old.id, active_low.id, draft_urgent.id]
        );

        rank_projects(&mut all, PriorityRule::ByPriority);
        assert_eq!(all[0].id, draft_urgent.id);

        rank_projects(&mut all, PriorityRule::Newest);
        assert_eq!(all[0].id, active_high_new.id);
    }

    #[test]
    fn full_ties_break_on_id() {
        let c = CompetitorId::new();
        let a = project(7, ProjectStatus::Active, ProjectPriority::Medium, 0, c);
        let mut b = project(3, ProjectStatus::Active, ProjectPriority::Medium, 0, c);
        b.created_at = a.created_at;
        let mut pair = vec![a.clone(), b.clone()];
        for rule in [PriorityRule::ActiveFirst, PriorityRule::ByPriority, PriorityRule::Newest] {
            rank_projects(&mut pair, rule);
            assert_eq!(pair[0].id, b.id, "rule {rule:?}");
        }
    }

    #[test]
    fn unknown_rule_falls_back() {
        assert_eq!(PriorityRule::from_name("loudest"), PriorityRule::ActiveFirst);
        assert_eq!(PriorityRule::from_name(" Newest "), PriorityRule::Newest);
    }

    #[test]
    fn blank_competitor_id_is_rejected() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let cache = MokaProjectCache::new(16, Duration::from_secs(60));
        let discovery = ProjectDiscovery::new(&storage, &cache);
        for raw in ["", "   "] {
            let err = discovery.resolve(raw, &DiscoveryOptions::default()).unwrap_err();
            match err {
                EngineError::Validation(msg) => assert_eq!(msg, EMPTY_COMPETITOR_ID),
                other => panic!("expected validation error, got {other:?}"),
            }
        }
    }

    #[test]
    fn no_projects_is_unsuccessful_not_an_error() {
        let c = CompetitorId::new();
        let storage = store_with(&[], c);
        let cache = MokaProjectCache::new(16, Duration::from_secs(60));
        let discovery = ProjectDiscovery::new(&storage, &cache);
        let result = discovery
            .resolve(&c.to_string(), &DiscoveryOptions::default())
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some(NO_PROJECTS));
    }

    #[test]
    fn broken_cache_still_resolves() {
        let c = CompetitorId::new();
        let p = project(1, ProjectStatus::Active, ProjectPriority::High, 0, c);
        let storage = store_with(std::slice::from_ref(&p), c);
        let cache = BrokenCache;
        let discovery = ProjectDiscovery::new(&storage, &cache);
        let result = discovery.resolve_id(c, &DiscoveryOptions::default()).unwrap();
        assert!(result.success);
        assert_eq!(result.project_id, Some(p.id));
        discovery.invalidate_competitor(c);
        discovery.invalidate_all();
    }

    #[test]
    fn cache_serves_repeat_lookups_until_invalidated() {
        let c = CompetitorId::new();
        let first = project(1, ProjectStatus::Active, ProjectPriority::High, 0, c);
        let storage = store_with(std::slice::from_ref(&first), c);
        let cache = MokaProjectCache::new(16, Duration::from_secs(60));
        let discovery = ProjectDiscovery::new(&storage, &cache);

        assert_eq!(discovery.find_projects_by_competitor(c).unwrap().len(), 1);
        storage
            .insert_project(&project(2, ProjectStatus::Active, ProjectPriority::Low, 1, c))
            .unwrap();
        // stale but harmless
        assert_eq!(discovery.find_projects_by_competitor(c).unwrap().len(), 1);

        discovery.invalidate_competitor(c);
        assert_eq!(discovery.find_projects_by_competitor(c).unwrap().len(), 2);
    }
}
