//! `recon`: finds orphaned and zombie reports in a store and repairs them.
//!
//! ```bash
//! recon --db reports.db [--dry-run] [--skip-backup] [--min-confidence high]
//!       [--batch-size 25] [--stop-on-error] [--force] [--report-out run.json]
//! recon --db reports.db --restore backups/backup-<run>-<time>.json
//! ```
//!
//! Exits 0 only when every step succeeded and no item failed.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use recon_core::{Confidence, ReportId};
use recon_engine::backup;
use recon_engine::{ReconcileConfig, ReconcileEngine, RunOptions, RunReport, StepStatus};
use recon_storage::SqliteStorage;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "recon")]
#[command(about = "Reconcile report/project associations and repair incomplete reports")]
struct Args {
    /// SQLite database holding reports and projects
    #[arg(long, env = "RECON_DB", value_name = "FILE")]
    db: PathBuf,

    /// TOML configuration file
    #[arg(long, env = "RECON_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Compute and report every change without writing any of them
    #[arg(long)]
    dry_run: bool,

    /// Do not snapshot affected rows before writing
    #[arg(long)]
    skip_backup: bool,

    /// Lowest confidence that gets written: high, medium or low
    #[arg(long, value_parser = parse_gate)]
    min_confidence: Option<Confidence>,

    /// Rows per transaction
    #[arg(long)]
    batch_size: Option<usize>,

    /// Abort at the first failed write instead of recording it and continuing
    #[arg(long)]
    stop_on_error: bool,

    /// Proceed even when the anomaly count exceeds the configured limit
    #[arg(long)]
    force: bool,

    /// Only reconcile this report
    #[arg(long, value_name = "ID")]
    report_id: Option<ReportId>,

    /// Directory for backup artifacts (overrides config)
    #[arg(long, value_name = "DIR")]
    backup_dir: Option<PathBuf>,

    /// Write the run report as JSON
    #[arg(long, value_name = "FILE")]
    report_out: Option<PathBuf>,

    /// Restore a backup artifact instead of running
    #[arg(long, value_name = "ARTIFACT", conflicts_with = "dry_run")]
    restore: Option<PathBuf>,
}

fn parse_gate(s: &str) -> Result<Confidence, String> {
    match Confidence::parse(s) {
        Ok(Confidence::Failed) => Err("failed is not a confidence gate".to_string()),
        Ok(level) => Ok(level),
        Err(e) => Err(e.to_string()),
    }
}

impl Args {
    fn load_config(&self) -> Result<ReconcileConfig> {
        let mut config = match &self.config {
            Some(path) => ReconcileConfig::load(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => ReconcileConfig::default(),
        };
        if let Some(dir) = &self.backup_dir {
            config.backup.dir = dir.clone();
        }
        config.validate().context("invalid configuration")?;
        Ok(config)
    }

    fn run_options(&self) -> RunOptions {
        RunOptions {
            dry_run: self.dry_run,
            skip_backup: self.skip_backup,
            force_run: self.force,
            report_id: self.report_id,
            min_confidence: self.min_confidence,
            batch_size: self.batch_size,
            continue_on_error: self.stop_on_error.then_some(false),
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(2)
        }
    }
}

fn run(args: &Args) -> Result<u8> {
    let config = args.load_config()?;
    let db = args.db.to_string_lossy();
    let storage = SqliteStorage::open(&db)
        .with_context(|| format!("opening database {}", args.db.display()))?;
    info!(db = %args.db.display(), "database opened");
    let engine = ReconcileEngine::new(storage, config);

    if let Some(artifact) = &args.restore {
        restore(&engine, artifact)?;
        return Ok(0);
    }

    let report = engine.run(&args.run_options()).context("run aborted")?;
    print_report(&report);
    if let Some(path) = &args.report_out {
        report
            .write_json(path)
            .with_context(|| format!("writing run report {}", path.display()))?;
        info!(path = %path.display(), "run report written");
    }
    Ok(if report.exit_code() == 0 { 0 } else { 1 })
}

fn restore(engine: &ReconcileEngine<SqliteStorage>, artifact: &Path) -> Result<()> {
    let document = backup::load(artifact)
        .with_context(|| format!("reading backup {}", artifact.display()))?;
    info!(
        correlation_id = %document.correlation_id,
        records = document.record_count,
        "backup verified"
    );
    let summary = engine.backups().restore(&document).context("restore failed")?;
    println!(
        "restored {} report(s), removed {} version(s)",
        summary.reports_reset, summary.versions_deleted
    );
    Ok(())
}

fn print_report(report: &RunReport) {
    let mode = if report.dry_run { " (dry run)" } else { "" };
    println!("run {} {:?}{mode}", report.run_id, report.status);
    for step in &report.steps {
        let detail = match step.status {
            StepStatus::Failed => step.error.clone().unwrap_or_default(),
            StepStatus::Skipped => step.note.clone().unwrap_or_default(),
            _ => step.duration_ms.map(|ms| format!("{ms} ms")).unwrap_or_default(),
        };
        println!("  {:<18} {:<9} {detail}", step.id.as_str(), step.status.as_str());
    }

    let s = &report.summary;
    println!(
        "orphaned {} (high {}, medium {}, low {}, failed {}), zombies {}, unviewable {}",
        s.orphaned_found,
        s.resolution.high,
        s.resolution.medium,
        s.resolution.low,
        s.resolution.failed,
        s.zombies_found,
        s.unviewable_found
    );
    println!(
        "written {}, versions created {}, failed {}, skipped {}, rejected {}, success rate {:.1}%",
        s.associations_written,
        s.versions_created,
        s.failed,
        s.skipped,
        s.validation_failures,
        s.success_rate * 100.0
    );
    if let Some(artifact) = &report.backup {
        println!("backup {} ({})", artifact.path.display(), artifact.checksum);
    }
    if !report.rollback_candidates.is_empty() {
        let steps: Vec<_> = report.rollback_candidates.iter().map(|s| s.as_str()).collect();
        warn!(steps = ?steps, "steps may need rollback");
    }
    if report.retryable {
        println!("the failure looks transient; the run can be retried");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("recon").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults_leave_config_in_charge() {
        let args = parse(&["--db", "x.db"]);
        let options = args.run_options();
        assert_eq!(options, RunOptions::default());
    }

    #[test]
    fn flags_map_onto_run_options() {
        let id = ReportId::new();
        let id_text = id.to_string();
        let args = parse(&[
            "--db",
            "x.db",
            "--dry-run",
            "--min-confidence",
            "low",
            "--batch-size",
            "5",
            "--stop-on-error",
            "--force",
            "--report-id",
            &id_text,
        ]);
        let options = args.run_options();
        assert!(options.dry_run && options.force_run);
        assert_eq!(options.min_confidence, Some(Confidence::Low));
        assert_eq!(options.batch_size, Some(5));
        assert_eq!(options.continue_on_error, Some(false));
        assert_eq!(options.report_id, Some(id));
    }

    #[test]
    fn rejects_unknown_confidence() {
        for level in ["certain", "failed"] {
            let result = Args::try_parse_from(["recon", "--db", "x.db", "--min-confidence", level]);
            assert!(result.is_err(), "{level} accepted");
        }
    }

    #[test]
    fn config_file_and_backup_dir_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recon.toml");
        std::fs::write(&path, "[updater]\nbatch_size = 7\n").unwrap();
        let path_text = path.to_string_lossy().into_owned();
        let args = parse(&["--db", "x.db", "--config", &path_text, "--backup-dir", "snapshots"]);
        let config = args.load_config().unwrap();
        assert_eq!(config.updater.batch_size, 7);
        assert_eq!(config.backup.dir, PathBuf::from("snapshots"));
    }
}
