use recon_core::{
    CompetitorId, Confidence, ProjectId, ProjectPriority, ProjectStatus, ReportId, ReportStatus,
    Resolution, ResolutionMethod,
};
use recon_engine::batch::{NOT_ATTEMPTED, ROLLED_BACK};
use recon_engine::updater::{BatchUpdater, UpdateOptions, UpdateSummary};
use recon_harness::{FlakyStorage, TestStore};
use recon_storage::Storage;

struct Seeded {
    store: TestStore,
    competitor: CompetitorId,
    project: ProjectId,
    reports: Vec<ReportId>,
}

fn seeded(count: usize) -> Result<Seeded, Box<dyn std::error::Error>> {
    let store = TestStore::new()?;
    let competitor = store.competitor("acme")?;
    let project = store.project(
        "tracking",
        ProjectStatus::Active,
        ProjectPriority::High,
        &[competitor],
    )?;
    let mut reports = Vec::with_capacity(count);
    for i in 0..count {
        let name = format!("r{i}");
        reports.push(store.report(&name, ReportStatus::Completed, Some(competitor), None)?);
    }
    Ok(Seeded {
        store,
        competitor,
        project,
        reports,
    })
}

fn resolve_to(report: ReportId, competitor: CompetitorId, project: ProjectId) -> Resolution {
    Resolution::resolved(
        report,
        competitor,
        project,
        Confidence::High,
        ResolutionMethod::DirectSingle,
        "fixture",
    )
}

fn counts(summary: &UpdateSummary) -> (usize, usize, usize, usize) {
    (summary.successful, summary.failed, summary.skipped, summary.validation_failures)
}

/// Resolutions covering every outcome: written, gated, rejected, failed.
fn mixed(s: &Seeded) -> Result<Vec<Resolution>, Box<dyn std::error::Error>> {
    let unlinked = s
        .store
        .project("elsewhere", ProjectStatus::Active, ProjectPriority::Low, &[])?;
    let mut low = resolve_to(s.reports[1], s.competitor, s.project);
    low.confidence = Confidence::Low;
    Ok(vec![
        resolve_to(s.reports[0], s.competitor, s.project),
        low,
        resolve_to(s.reports[2], s.competitor, unlinked),
        // report that does not exist
        resolve_to(ReportId::new(), s.competitor, s.project),
        resolve_to(s.reports[3], s.competitor, s.project),
    ])
}

// ============================================================================
// Dry run
// ============================================================================

#[test]
fn dry_run_matches_live_counts_without_writing() -> Result<(), Box<dyn std::error::Error>> {
    let s = seeded(4)?;
    let resolutions = mixed(&s)?;
    let updater = BatchUpdater::new(&s.store.storage);

    let dry = updater.update(
        &resolutions,
        &UpdateOptions {
            dry_run: true,
            batch_size: 2,
            ..UpdateOptions::default()
        },
    )?;
    for report in &s.reports {
        assert_eq!(s.store.report_project(*report)?, None);
    }

    let live = updater.update(
        &resolutions,
        &UpdateOptions {
            batch_size: 2,
            ..UpdateOptions::default()
        },
    )?;
    assert_eq!(counts(&dry), counts(&live));
    assert_eq!(counts(&live), (2, 1, 1, 1));
    assert_eq!(dry.errors.len(), live.errors.len());
    assert_eq!(dry.batches_committed, live.batches_committed);
    assert!(dry.dry_run && !live.dry_run);
    assert_eq!(live.total(), resolutions.len());

    assert_eq!(s.store.report_project(s.reports[0])?, Some(s.project));
    assert_eq!(s.store.report_project(s.reports[3])?, Some(s.project));
    assert_eq!(s.store.report_project(s.reports[2])?, None);
    Ok(())
}

// ============================================================================
// Continue vs stop semantics
// ============================================================================

#[test]
fn continue_on_error_records_failure_and_keeps_going() -> Result<(), Box<dyn std::error::Error>> {
    let s = seeded(6)?;
    let mut resolutions: Vec<_> = s
        .reports
        .iter()
        .map(|r| resolve_to(*r, s.competitor, s.project))
        .collect();
    resolutions.insert(4, resolve_to(ReportId::new(), s.competitor, s.project));

    let summary = BatchUpdater::new(&s.store.storage).update(
        &resolutions,
        &UpdateOptions {
            batch_size: 3,
            continue_on_error: true,
            ..UpdateOptions::default()
        },
    )?;
    assert_eq!(summary.successful, 6);
    assert_eq!(summary.failed, 1);
    assert!(!summary.stopped);
    assert_eq!(summary.errors[0].report_id, resolutions[4].report_id);
    for report in &s.reports {
        assert_eq!(s.store.report_project(*report)?, Some(s.project));
    }
    Ok(())
}

#[test]
fn stop_on_error_keeps_earlier_batches_only() -> Result<(), Box<dyn std::error::Error>> {
    let s = seeded(6)?;
    let mut resolutions: Vec<_> = s
        .reports
        .iter()
        .map(|r| resolve_to(*r, s.competitor, s.project))
        .collect();
    // batches of 3: [0 1 2] [3 bad 4] [5]
    let bad = ReportId::new();
    resolutions.insert(4, resolve_to(bad, s.competitor, s.project));

    let summary = BatchUpdater::new(&s.store.storage).update(
        &resolutions,
        &UpdateOptions {
            batch_size: 3,
            continue_on_error: false,
            ..UpdateOptions::default()
        },
    )?;
    assert!(summary.stopped);
    assert_eq!(summary.batches_committed, 1);
    assert_eq!(counts(&summary), (3, 2, 2, 0));

    for report in &s.reports[..3] {
        assert_eq!(s.store.report_project(*report)?, Some(s.project));
    }
    for report in &s.reports[3..] {
        assert_eq!(s.store.report_project(*report)?, None);
    }

    let rolled_back = summary.errors.iter().find(|e| e.report_id == s.reports[3]).unwrap();
    assert_eq!(rolled_back.error, ROLLED_BACK);
    let failed = summary.errors.iter().find(|e| e.report_id == bad).unwrap();
    assert!(failed.error.contains("not found"), "{}", failed.error);
    assert!(!summary.errors.iter().any(|e| e.error == NOT_ATTEMPTED));
    Ok(())
}

#[test]
fn injected_write_failure_is_isolated() -> Result<(), Box<dyn std::error::Error>> {
    let s = seeded(3)?;
    let resolutions: Vec<_> = s
        .reports
        .iter()
        .map(|r| resolve_to(*r, s.competitor, s.project))
        .collect();
    let (reports, competitor, project) = (s.reports.clone(), s.competitor, s.project);
    let flaky = FlakyStorage::new(s.store.into_storage());
    flaky.fail_writes_for(reports[1])?;

    let summary = BatchUpdater::new(&flaky).update(&resolutions, &UpdateOptions::default())?;
    assert_eq!(counts(&summary), (2, 1, 0, 0));
    assert!(summary.errors[0].error.contains("injected write failure"));

    let project_of = |id| flaky.get_report(id).map(|r| r.and_then(|r| r.project_id));
    assert_eq!(project_of(reports[0])?, Some(project));
    assert_eq!(project_of(reports[1])?, None);
    assert_eq!(project_of(reports[2])?, Some(project));
    assert!(flaky.project_has_competitor(project, competitor)?);
    Ok(())
}

#[test]
fn transaction_that_never_opens_fails_every_item() -> Result<(), Box<dyn std::error::Error>> {
    let s = seeded(3)?;
    let resolutions: Vec<_> = s
        .reports
        .iter()
        .map(|r| resolve_to(*r, s.competitor, s.project))
        .collect();
    let reports = s.reports.clone();
    let flaky = FlakyStorage::new(s.store.into_storage());
    flaky.set_transactions_down(true);

    let summary = BatchUpdater::new(&flaky).update(
        &resolutions,
        &UpdateOptions {
            batch_size: 2,
            ..UpdateOptions::default()
        },
    )?;
    assert_eq!(counts(&summary), (0, 3, 0, 0));
    assert_eq!(summary.total(), resolutions.len());
    assert_eq!(summary.batches_committed, 0);
    let failed: Vec<_> = summary.errors.iter().map(|e| e.report_id).collect();
    assert_eq!(failed, reports);
    assert!(summary.errors.iter().all(|e| e.error.contains("injected transaction failure")));

    let stopped = BatchUpdater::new(&flaky).update(
        &resolutions,
        &UpdateOptions {
            batch_size: 2,
            continue_on_error: false,
            ..UpdateOptions::default()
        },
    )?;
    assert!(stopped.stopped);
    assert_eq!(counts(&stopped), (0, 2, 1, 0));
    assert_eq!(stopped.total(), resolutions.len());
    Ok(())
}

// ============================================================================
// Referential soundness
// ============================================================================

#[test]
fn written_projects_are_linked_to_report_competitor() -> Result<(), Box<dyn std::error::Error>> {
    let s = seeded(4)?;
    let resolutions = mixed(&s)?;
    BatchUpdater::new(&s.store.storage).update(&resolutions, &UpdateOptions::default())?;

    for report in s.store.storage.find_reports(&Default::default())? {
        if let (Some(project), Some(competitor)) = (report.project_id, report.competitor_id) {
            assert!(
                s.store.storage.project_has_competitor(project, competitor)?,
                "report {} points at unlinked project {project}",
                report.id
            );
        }
    }
    Ok(())
}

#[test]
fn applied_changes_record_previous_project() -> Result<(), Box<dyn std::error::Error>> {
    let s = seeded(1)?;
    let other = s.store.project(
        "other",
        ProjectStatus::Draft,
        ProjectPriority::Low,
        &[s.competitor],
    )?;
    let updater = BatchUpdater::new(&s.store.storage);

    updater.update(&[resolve_to(s.reports[0], s.competitor, other)], &UpdateOptions::default())?;
    let second = updater.update(
        &[resolve_to(s.reports[0], s.competitor, s.project)],
        &UpdateOptions::default(),
    )?;
    assert_eq!(second.applied.len(), 1);
    assert_eq!(second.applied[0].previous_project_id, Some(other));
    assert_eq!(second.applied[0].new_project_id, s.project);
    assert_eq!(second.touched_competitors(), vec![s.competitor]);
    Ok(())
}
