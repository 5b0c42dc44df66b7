use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};

use recon_core::{
    Competitor, CompetitorId, Project, ProjectId, ProjectPriority, ProjectStatus,
    QualityMetadata, ReportId, ReportSchedule, ReportStatus, ReportSummary, ReportVersion,
    ScheduleId, VersionId,
};

use crate::error::StorageError;
use crate::schema::{
    COMPLETED_REQUIRES_VERSION_TRIGGER, DROP_INTEGRITY_CONSTRAINTS_SQL,
    INTEGRITY_CONSTRAINTS_SQL, ORPHANED_REPORTS_INDEX,
};
use crate::traits::{ProjectFilter, ProjectOrder, ReportFilter, Storage, WriteTx};

/// Convert Vec<u8> to fixed-size array with proper error handling.
fn to_array<const N: usize>(v: Vec<u8>, label: &str) -> Result<[u8; N], StorageError> {
    v.try_into()
        .map_err(|_| StorageError::Serialization(format!("invalid {label} length")))
}

fn to_millis(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64, label: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| StorageError::Serialization(format!("invalid {label} timestamp: {ms}")))
}

fn blob(bytes: &[u8; 16]) -> Value {
    Value::Blob(bytes.to_vec())
}

fn encode_content(content: &Option<serde_json::Value>) -> Result<Option<Vec<u8>>, StorageError> {
    content
        .as_ref()
        .map(|c| rmp_serde::to_vec(c).map_err(|e| StorageError::Serialization(e.to_string())))
        .transpose()
}

fn decode_content(bytes: Option<Vec<u8>>) -> Result<Option<serde_json::Value>, StorageError> {
    bytes
        .map(|b| {
            rmp_serde::from_slice::<serde_json::Value>(&b)
                .map_err(|e| StorageError::Serialization(e.to_string()))
        })
        .transpose()
}

type RawReport = (Vec<u8>, String, String, Option<Vec<u8>>, Option<Vec<u8>>, i64, i64);

const REPORT_COLUMNS: &str =
    "r.id, r.name, r.status, r.competitor_id, r.project_id, r.created_at, r.updated_at";

fn read_raw_report(row: &rusqlite::Row) -> rusqlite::Result<RawReport> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn report_from_raw(raw: RawReport) -> Result<ReportSummary, StorageError> {
    let (id, name, status, competitor_id, project_id, created_at, updated_at) = raw;
    Ok(ReportSummary {
        id: ReportId::from_bytes(to_array::<16>(id, "report id")?),
        name,
        status: ReportStatus::parse(&status)?,
        competitor_id: competitor_id
            .map(|b| to_array::<16>(b, "competitor id").map(CompetitorId::from_bytes))
            .transpose()?,
        project_id: project_id
            .map(|b| to_array::<16>(b, "project id").map(ProjectId::from_bytes))
            .transpose()?,
        created_at: from_millis(created_at, "report created_at")?,
        updated_at: from_millis(updated_at, "report updated_at")?,
    })
}

type RawProject = (Vec<u8>, String, String, String, i64, i64);

fn read_projects(
    conn: &Connection,
    sql: &str,
    params: Vec<Value>,
) -> Result<Vec<Project>, StorageError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params), |row| {
            Ok((
                row.get::<_, Vec<u8>>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?
        .collect::<Result<Vec<RawProject>, _>>()?;

    let mut link_stmt = conn.prepare(
        "SELECT competitor_id FROM project_competitors WHERE project_id = ?1 ORDER BY competitor_id",
    )?;
    let mut result = Vec::with_capacity(rows.len());
    for (id_bytes, name, status, priority, created_at, updated_at) in rows {
        let id = ProjectId::from_bytes(to_array::<16>(id_bytes, "project id")?);
        let competitor_ids = link_stmt
            .query_map(rusqlite::params![id.as_bytes().as_slice()], |row| {
                row.get::<_, Vec<u8>>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|b| to_array::<16>(b, "competitor id").map(CompetitorId::from_bytes))
            .collect::<Result<Vec<_>, _>>()?;
        result.push(Project {
            id,
            name,
            status: ProjectStatus::parse(&status)?,
            priority: ProjectPriority::parse(&priority)?,
            created_at: from_millis(created_at, "project created_at")?,
            updated_at: from_millis(updated_at, "project updated_at")?,
            competitor_ids,
        });
    }
    Ok(result)
}

fn report_where(filter: &ReportFilter) -> (String, Vec<Value>) {
    let mut clause = String::from(" WHERE 1 = 1");
    let mut params = Vec::new();
    if let Some(report_id) = filter.report_id {
        clause.push_str(" AND r.id = ?");
        params.push(blob(report_id.as_bytes()));
    }
    if let Some(status) = filter.status {
        clause.push_str(" AND r.status = ?");
        params.push(Value::Text(status.as_str().to_string()));
    }
    if let Some(competitor_id) = filter.competitor_id {
        clause.push_str(" AND r.competitor_id = ?");
        params.push(blob(competitor_id.as_bytes()));
    }
    if filter.project_missing {
        clause.push_str(" AND r.project_id IS NULL");
    }
    if filter.without_versions {
        clause.push_str(
            " AND NOT EXISTS (SELECT 1 FROM report_versions v WHERE v.report_id = r.id)",
        );
    }
    if filter.without_content {
        clause.push_str(
            " AND EXISTS (SELECT 1 FROM report_versions v WHERE v.report_id = r.id)
              AND NOT EXISTS (SELECT 1 FROM report_versions v WHERE v.report_id = r.id AND v.content IS NOT NULL)",
        );
    }
    (clause, params)
}

fn count_versions_on(conn: &Connection, report_id: ReportId) -> Result<u64, StorageError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM report_versions WHERE report_id = ?1",
        rusqlite::params![report_id.as_bytes().as_slice()],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

fn project_has_competitor_on(
    conn: &Connection,
    project_id: ProjectId,
    competitor_id: CompetitorId,
) -> Result<bool, StorageError> {
    let linked: bool = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM project_competitors WHERE project_id = ?1 AND competitor_id = ?2)",
        rusqlite::params![
            project_id.as_bytes().as_slice(),
            competitor_id.as_bytes().as_slice(),
        ],
        |row| row.get(0),
    )?;
    Ok(linked)
}

fn insert_version_on(conn: &Connection, version: &ReportVersion) -> Result<(), StorageError> {
    let content = encode_content(&version.content)?;
    conn.execute(
        "INSERT INTO report_versions (id, report_id, version, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            version.id.as_bytes().as_slice(),
            version.report_id.as_bytes().as_slice(),
            version.version,
            content,
            to_millis(&version.created_at),
        ],
    )
    .map_err(|e| {
        StorageError::from_write(e, format!("insert version for report {}", version.report_id))
    })?;
    Ok(())
}

pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Unavailable(format!("connection lock poisoned: {e}")))
    }

    // ========================================================================
    // Seeding (records are created by other systems; used by fixtures/imports)
    // ========================================================================

    pub fn insert_competitor(&self, competitor: &Competitor) -> Result<(), StorageError> {
        self.lock()?.execute(
            "INSERT INTO competitors (id, name) VALUES (?1, ?2)",
            rusqlite::params![competitor.id.as_bytes().as_slice(), competitor.name],
        )?;
        Ok(())
    }

    /// Inserts a project together with its competitor links.
    pub fn insert_project(&self, project: &Project) -> Result<(), StorageError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO projects (id, name, status, priority, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                project.id.as_bytes().as_slice(),
                project.name,
                project.status.as_str(),
                project.priority.as_str(),
                to_millis(&project.created_at),
                to_millis(&project.updated_at),
            ],
        )?;
        for competitor_id in &project.competitor_ids {
            tx.execute(
                "INSERT INTO project_competitors (project_id, competitor_id) VALUES (?1, ?2)",
                rusqlite::params![
                    project.id.as_bytes().as_slice(),
                    competitor_id.as_bytes().as_slice(),
                ],
            )
            .map_err(|e| StorageError::from_write(e, format!("link project {}", project.id)))?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn link_project_competitor(
        &self,
        project_id: ProjectId,
        competitor_id: CompetitorId,
    ) -> Result<(), StorageError> {
        self.lock()?
            .execute(
                "INSERT OR IGNORE INTO project_competitors (project_id, competitor_id) VALUES (?1, ?2)",
                rusqlite::params![
                    project_id.as_bytes().as_slice(),
                    competitor_id.as_bytes().as_slice(),
                ],
            )
            .map_err(|e| StorageError::from_write(e, format!("link project {project_id}")))?;
        Ok(())
    }

    pub fn unlink_project_competitor(
        &self,
        project_id: ProjectId,
        competitor_id: CompetitorId,
    ) -> Result<(), StorageError> {
        self.lock()?.execute(
            "DELETE FROM project_competitors WHERE project_id = ?1 AND competitor_id = ?2",
            rusqlite::params![
                project_id.as_bytes().as_slice(),
                competitor_id.as_bytes().as_slice(),
            ],
        )?;
        Ok(())
    }

    pub fn insert_report(&self, report: &ReportSummary) -> Result<(), StorageError> {
        self.lock()?
            .execute(
                "INSERT INTO reports (id, name, status, competitor_id, project_id, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    report.id.as_bytes().as_slice(),
                    report.name,
                    report.status.as_str(),
                    report.competitor_id.map(|c| c.as_bytes().to_vec()),
                    report.project_id.map(|p| p.as_bytes().to_vec()),
                    to_millis(&report.created_at),
                    to_millis(&report.updated_at),
                ],
            )
            .map_err(|e| StorageError::from_write(e, format!("insert report {}", report.id)))?;
        Ok(())
    }

    pub fn set_report_status(
        &self,
        report_id: ReportId,
        status: ReportStatus,
    ) -> Result<(), StorageError> {
        let changed = self
            .lock()?
            .execute(
                "UPDATE reports SET status = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![
                    status.as_str(),
                    to_millis(&Utc::now()),
                    report_id.as_bytes().as_slice(),
                ],
            )
            .map_err(|e| StorageError::from_write(e, format!("set status of report {report_id}")))?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("report {report_id}")));
        }
        Ok(())
    }

    pub fn insert_version(&self, version: &ReportVersion) -> Result<(), StorageError> {
        insert_version_on(&*self.lock()?, version)
    }

    pub fn insert_schedule(&self, schedule: &ReportSchedule) -> Result<(), StorageError> {
        self.lock()?.execute(
            "INSERT INTO report_schedules (id, report_id, frequency, next_run_at, enabled) VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                schedule.id.as_bytes().as_slice(),
                schedule.report_id.as_bytes().as_slice(),
                schedule.frequency,
                schedule.next_run_at.as_ref().map(to_millis),
                schedule.enabled,
            ],
        )?;
        Ok(())
    }

    pub fn insert_quality(&self, quality: &QualityMetadata) -> Result<(), StorageError> {
        self.lock()?.execute(
            "INSERT INTO report_quality (report_id, completeness_score, freshness, snapshot_count, captured_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                quality.report_id.as_bytes().as_slice(),
                quality.completeness_score,
                quality.freshness,
                quality.snapshot_count,
                to_millis(&quality.captured_at),
            ],
        )?;
        Ok(())
    }
}

impl Storage for SqliteStorage {
    fn find_reports(&self, filter: &ReportFilter) -> Result<Vec<ReportSummary>, StorageError> {
        let (clause, mut params) = report_where(filter);
        let mut sql =
            format!("SELECT {REPORT_COLUMNS} FROM reports r{clause} ORDER BY r.created_at, r.id");
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            params.push(Value::Integer(limit as i64));
        }
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let raw = stmt
            .query_map(rusqlite::params_from_iter(params), read_raw_report)?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(report_from_raw).collect()
    }

    fn count_reports(&self, filter: &ReportFilter) -> Result<u64, StorageError> {
        let (clause, params) = report_where(filter);
        let sql = format!("SELECT COUNT(*) FROM reports r{clause}");
        let count: i64 = self
            .lock()?
            .query_row(&sql, rusqlite::params_from_iter(params), |row| row.get(0))?;
        Ok(count as u64)
    }

    fn get_report(&self, report_id: ReportId) -> Result<Option<ReportSummary>, StorageError> {
        let sql = format!("SELECT {REPORT_COLUMNS} FROM reports r WHERE r.id = ?1");
        let raw = self
            .lock()?
            .query_row(
                &sql,
                rusqlite::params![report_id.as_bytes().as_slice()],
                read_raw_report,
            )
            .optional()?;
        raw.map(report_from_raw).transpose()
    }

    fn find_projects(&self, filter: &ProjectFilter) -> Result<Vec<Project>, StorageError> {
        let mut sql = String::from(
            "SELECT p.id, p.name, p.status, p.priority, p.created_at, p.updated_at FROM projects p WHERE 1 = 1",
        );
        let mut params = Vec::new();
        if let Some(competitor_id) = filter.competitor_id {
            sql.push_str(
                " AND EXISTS (SELECT 1 FROM project_competitors pc WHERE pc.project_id = p.id AND pc.competitor_id = ?)",
            );
            params.push(blob(competitor_id.as_bytes()));
        }
        if !filter.statuses.is_empty() {
            let placeholders = vec!["?"; filter.statuses.len()].join(", ");
            sql.push_str(&format!(" AND p.status IN ({placeholders})"));
            params.extend(
                filter
                    .statuses
                    .iter()
                    .map(|s| Value::Text(s.as_str().to_string())),
            );
        }
        if let Some((from, to)) = &filter.created_between {
            sql.push_str(" AND p.created_at BETWEEN ? AND ?");
            params.push(Value::Integer(to_millis(from)));
            params.push(Value::Integer(to_millis(to)));
        }
        sql.push_str(match filter.order {
            ProjectOrder::UpdatedDesc => " ORDER BY p.updated_at DESC, p.id",
            ProjectOrder::CreatedDesc => " ORDER BY p.created_at DESC, p.id",
        });
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            params.push(Value::Integer(limit as i64));
        }
        read_projects(&*self.lock()?, &sql, params)
    }

    fn get_project(&self, project_id: ProjectId) -> Result<Option<Project>, StorageError> {
        let projects = read_projects(
            &*self.lock()?,
            "SELECT p.id, p.name, p.status, p.priority, p.created_at, p.updated_at FROM projects p WHERE p.id = ?",
            vec![blob(project_id.as_bytes())],
        )?;
        Ok(projects.into_iter().next())
    }

    fn project_has_competitor(
        &self,
        project_id: ProjectId,
        competitor_id: CompetitorId,
    ) -> Result<bool, StorageError> {
        project_has_competitor_on(&*self.lock()?, project_id, competitor_id)
    }

    fn get_competitor(
        &self,
        competitor_id: CompetitorId,
    ) -> Result<Option<Competitor>, StorageError> {
        let name: Option<String> = self
            .lock()?
            .query_row(
                "SELECT name FROM competitors WHERE id = ?1",
                rusqlite::params![competitor_id.as_bytes().as_slice()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(name.map(|name| Competitor {
            id: competitor_id,
            name,
        }))
    }

    fn get_versions(&self, report_id: ReportId) -> Result<Vec<ReportVersion>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, version, content, created_at FROM report_versions WHERE report_id = ?1 ORDER BY version",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![report_id.as_bytes().as_slice()], |row| {
                Ok((
                    row.get::<_, Vec<u8>>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, Option<Vec<u8>>>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut result = Vec::with_capacity(rows.len());
        for (id_bytes, version, content, created_at) in rows {
            result.push(ReportVersion {
                id: VersionId::from_bytes(to_array::<16>(id_bytes, "version id")?),
                report_id,
                version,
                content: decode_content(content)?,
                created_at: from_millis(created_at, "version created_at")?,
            });
        }
        Ok(result)
    }

    fn count_versions(&self, report_id: ReportId) -> Result<u64, StorageError> {
        count_versions_on(&*self.lock()?, report_id)
    }

    fn get_schedules(&self, report_id: ReportId) -> Result<Vec<ReportSchedule>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, frequency, next_run_at, enabled FROM report_schedules WHERE report_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![report_id.as_bytes().as_slice()], |row| {
                Ok((
                    row.get::<_, Vec<u8>>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, bool>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut result = Vec::with_capacity(rows.len());
        for (id_bytes, frequency, next_run_at, enabled) in rows {
            result.push(ReportSchedule {
                id: ScheduleId::from_bytes(to_array::<16>(id_bytes, "schedule id")?),
                report_id,
                frequency,
                next_run_at: next_run_at
                    .map(|ms| from_millis(ms, "schedule next_run_at"))
                    .transpose()?,
                enabled,
            });
        }
        Ok(result)
    }

    fn get_quality(&self, report_id: ReportId) -> Result<Option<QualityMetadata>, StorageError> {
        let row = self
            .lock()?
            .query_row(
                "SELECT completeness_score, freshness, snapshot_count, captured_at FROM report_quality WHERE report_id = ?1",
                rusqlite::params![report_id.as_bytes().as_slice()],
                |row| {
                    Ok((
                        row.get::<_, u8>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, u32>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;
        row.map(|(completeness_score, freshness, snapshot_count, captured_at)| {
            Ok(QualityMetadata {
                report_id,
                completeness_score,
                freshness,
                snapshot_count,
                captured_at: from_millis(captured_at, "quality captured_at")?,
            })
        })
        .transpose()
    }

    fn transaction<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut dyn WriteTx) -> Result<T, StorageError>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut write_tx = SqliteWriteTx { tx };
        match f(&mut write_tx) {
            Ok(value) => {
                write_tx.tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = write_tx.tx.rollback() {
                    tracing::warn!(error = %rollback_err, "transaction rollback failed");
                }
                Err(e)
            }
        }
    }

    fn apply_integrity_constraints(&self) -> Result<Vec<String>, StorageError> {
        self.lock()?.execute_batch(INTEGRITY_CONSTRAINTS_SQL)?;
        Ok(vec![
            COMPLETED_REQUIRES_VERSION_TRIGGER.to_string(),
            ORPHANED_REPORTS_INDEX.to_string(),
        ])
    }

    fn drop_integrity_constraints(&self) -> Result<(), StorageError> {
        self.lock()?.execute_batch(DROP_INTEGRITY_CONSTRAINTS_SQL)?;
        Ok(())
    }
}

/// Write handle bound to one open sqlite transaction.
struct SqliteWriteTx<'c> {
    tx: rusqlite::Transaction<'c>,
}

impl WriteTx for SqliteWriteTx<'_> {
    fn report_exists(&mut self, report_id: ReportId) -> Result<bool, StorageError> {
        let exists: bool = self.tx.query_row(
            "SELECT EXISTS (SELECT 1 FROM reports WHERE id = ?1)",
            rusqlite::params![report_id.as_bytes().as_slice()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn project_has_competitor(
        &mut self,
        project_id: ProjectId,
        competitor_id: CompetitorId,
    ) -> Result<bool, StorageError> {
        project_has_competitor_on(&self.tx, project_id, competitor_id)
    }

    fn count_versions(&mut self, report_id: ReportId) -> Result<u64, StorageError> {
        count_versions_on(&self.tx, report_id)
    }

    fn report_competitor(
        &mut self,
        report_id: ReportId,
    ) -> Result<Option<CompetitorId>, StorageError> {
        let competitor: Option<Option<Vec<u8>>> = self
            .tx
            .query_row(
                "SELECT competitor_id FROM reports WHERE id = ?1",
                rusqlite::params![report_id.as_bytes().as_slice()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(competitor) = competitor else {
            return Err(StorageError::NotFound(format!("report {report_id}")));
        };
        competitor
            .map(|bytes| to_array(bytes, "competitor_id").map(CompetitorId::from_bytes))
            .transpose()
    }

    fn update_report_project(
        &mut self,
        report_id: ReportId,
        project_id: Option<ProjectId>,
    ) -> Result<Option<ProjectId>, StorageError> {
        let previous: Option<Option<Vec<u8>>> = self
            .tx
            .query_row(
                "SELECT project_id FROM reports WHERE id = ?1",
                rusqlite::params![report_id.as_bytes().as_slice()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(previous) = previous else {
            return Err(StorageError::NotFound(format!("report {report_id}")));
        };
        self.tx
            .execute(
                "UPDATE reports SET project_id = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![
                    project_id.map(|p| p.as_bytes().to_vec()),
                    to_millis(&Utc::now()),
                    report_id.as_bytes().as_slice(),
                ],
            )
            .map_err(|e| {
                StorageError::from_write(e, format!("update project of report {report_id}"))
            })?;
        previous
            .map(|bytes| to_array(bytes, "project_id").map(ProjectId::from_bytes))
            .transpose()
    }

    fn insert_version(&mut self, version: &ReportVersion) -> Result<(), StorageError> {
        insert_version_on(&self.tx, version)
    }

    fn delete_version(&mut self, version_id: VersionId) -> Result<(), StorageError> {
        self.tx.execute(
            "DELETE FROM report_versions WHERE id = ?1",
            rusqlite::params![version_id.as_bytes().as_slice()],
        )?;
        Ok(())
    }
}
