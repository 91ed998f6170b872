// SQLite-backed job store
use chrono::{DateTime, SecondsFormat, Utc};
use qcmms_core::error::{JobStoreError, StoreResult};
use qcmms_core::joblog::{
    DispatchAttempt, JobId, JobOutcome, JobRecord, JobStore, NewJob, StageEntry, Transition,
};
use qcmms_core::pipeline::Stage;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

const PRAGMAS: &str = "\
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
";

const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS jobs (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    use_case    TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    pid         INTEGER NOT NULL,
    started_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS job_outcomes (
    job_id      INTEGER PRIMARY KEY REFERENCES jobs(id),
    outcome     TEXT NOT NULL,
    reason      TEXT,
    finished_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS job_stages (
    job_id      INTEGER NOT NULL REFERENCES jobs(id),
    position    INTEGER NOT NULL,
    stage       TEXT NOT NULL,
    PRIMARY KEY (job_id, position)
);

CREATE TABLE IF NOT EXISTS stage_entries (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id      INTEGER NOT NULL REFERENCES jobs(id),
    stage       TEXT NOT NULL,
    platform    TEXT NOT NULL,
    status      TEXT NOT NULL,
    started_at  TEXT NOT NULL,
    finished_at TEXT NOT NULL,
    diagnostic  TEXT
);

CREATE TABLE IF NOT EXISTS transitions (
    id      INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id  INTEGER NOT NULL REFERENCES jobs(id),
    state   TEXT NOT NULL,
    at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS dispatch_attempts (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id      INTEGER NOT NULL REFERENCES jobs(id),
    attempt     INTEGER NOT NULL,
    succeeded   INTEGER NOT NULL,
    detail      TEXT NOT NULL,
    at          TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_use_case ON jobs(use_case);
CREATE INDEX IF NOT EXISTS idx_stage_entries_job ON stage_entries(job_id);
CREATE INDEX IF NOT EXISTS idx_transitions_job ON transitions(job_id);
CREATE INDEX IF NOT EXISTS idx_dispatch_attempts_job ON dispatch_attempts(job_id);
";

/// Child tables, deleted before their job row
const JOB_TABLES: [&str; 5] = [
    "job_stages",
    "stage_entries",
    "transitions",
    "dispatch_attempts",
    "job_outcomes",
];

const SELECT_JOB: &str = "
SELECT j.id, j.use_case, j.fingerprint, j.pid, j.started_at,
       o.finished_at, o.outcome, o.reason
FROM jobs j
LEFT JOIN job_outcomes o ON o.job_id = j.id";

/// Job store persisted in a single SQLite file.
///
/// Several processes may share one file; writes that check state first run
/// in immediate transactions so they serialise on the database lock.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(JobStoreError::backend)?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(JobStoreError::backend)?;
        conn.execute_batch(PRAGMAS)
            .map_err(JobStoreError::backend)?;
        Self::with_schema(conn)
    }

    /// Private in-memory database
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(JobStoreError::backend)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(JobStoreError::backend)?;
        Self::with_schema(conn)
    }

    fn with_schema(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(CREATE_TABLES)
            .map_err(JobStoreError::backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| JobStoreError::LockPoisoned)
    }

    /// Run an append inside an immediate transaction after checking the job
    fn append<F>(&self, job_id: JobId, insert: F) -> StoreResult<()>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<usize>,
    {
        let mut conn = self.lock_conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(JobStoreError::backend)?;
        ensure_job(&tx, job_id)?;
        insert(&tx).map_err(JobStoreError::backend)?;
        tx.commit().map_err(JobStoreError::backend)
    }
}

fn ensure_job(conn: &Connection, job_id: JobId) -> StoreResult<()> {
    let exists: bool = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM jobs WHERE id = ?1)",
            rusqlite::params![job_id],
            |row| row.get(0),
        )
        .map_err(JobStoreError::backend)?;
    if exists {
        Ok(())
    } else {
        Err(JobStoreError::UnknownJob(job_id))
    }
}

fn format_time(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_time(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|err| JobStoreError::corrupt(format!("timestamp '{}': {}", raw, err)))
}

fn parse_field<T>(raw: &str) -> StoreResult<T>
where
    T: FromStr<Err = String>,
{
    raw.parse().map_err(JobStoreError::corrupt)
}

/// Raw columns of a job row, decoded after the statement finishes
struct JobRow {
    id: JobId,
    use_case: String,
    fingerprint: String,
    pid: i64,
    started_at: String,
    finished_at: Option<String>,
    outcome: Option<String>,
    reason: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            use_case: row.get(1)?,
            fingerprint: row.get(2)?,
            pid: row.get(3)?,
            started_at: row.get(4)?,
            finished_at: row.get(5)?,
            outcome: row.get(6)?,
            reason: row.get(7)?,
        })
    }

    fn decode(self) -> StoreResult<JobRecord> {
        let pid = u32::try_from(self.pid)
            .map_err(|_| JobStoreError::corrupt(format!("pid {} of job {}", self.pid, self.id)))?;
        Ok(JobRecord {
            id: self.id,
            use_case: self.use_case,
            fingerprint: self.fingerprint,
            pid,
            started_at: parse_time(&self.started_at)?,
            finished_at: self.finished_at.as_deref().map(parse_time).transpose()?,
            outcome: self.outcome.as_deref().map(parse_field).transpose()?,
            reason: self.reason,
        })
    }
}

impl JobStore for SqliteJobStore {
    fn begin_job(&self, job: &NewJob) -> StoreResult<JobId> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO jobs (use_case, fingerprint, pid, started_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                job.use_case,
                job.fingerprint,
                i64::from(job.pid),
                format_time(&job.started_at)
            ],
        )
        .map_err(JobStoreError::backend)?;
        Ok(conn.last_insert_rowid())
    }

    fn append_transition(&self, job_id: JobId, transition: &Transition) -> StoreResult<()> {
        self.append(job_id, |conn| {
            conn.execute(
                "INSERT INTO transitions (job_id, state, at) VALUES (?1, ?2, ?3)",
                rusqlite::params![job_id, transition.state, format_time(&transition.at)],
            )
        })
    }

    fn append_schedule(&self, job_id: JobId, stages: &[Stage]) -> StoreResult<()> {
        self.append(job_id, |conn| {
            let offset: i64 = conn.query_row(
                "SELECT COUNT(*) FROM job_stages WHERE job_id = ?1",
                rusqlite::params![job_id],
                |row| row.get(0),
            )?;
            let mut stmt = conn.prepare(
                "INSERT INTO job_stages (job_id, position, stage) VALUES (?1, ?2, ?3)",
            )?;
            let mut inserted = 0;
            for (position, stage) in (offset..).zip(stages) {
                inserted += stmt.execute(rusqlite::params![job_id, position, stage.tag()])?;
            }
            Ok(inserted)
        })
    }

    fn append_stage(&self, job_id: JobId, entry: &StageEntry) -> StoreResult<()> {
        self.append(job_id, |conn| {
            conn.execute(
                "INSERT INTO stage_entries
                     (job_id, stage, platform, status, started_at, finished_at, diagnostic)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    job_id,
                    entry.stage.tag(),
                    entry.platform.as_str(),
                    entry.status.as_str(),
                    format_time(&entry.started_at),
                    format_time(&entry.finished_at),
                    entry.diagnostic
                ],
            )
        })
    }

    fn append_dispatch_attempt(
        &self,
        job_id: JobId,
        attempt: &DispatchAttempt,
    ) -> StoreResult<()> {
        self.append(job_id, |conn| {
            conn.execute(
                "INSERT INTO dispatch_attempts (job_id, attempt, succeeded, detail, at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    job_id,
                    attempt.attempt,
                    attempt.succeeded,
                    attempt.detail,
                    format_time(&attempt.at)
                ],
            )
        })
    }

    fn finalize_job(
        &self,
        job_id: JobId,
        outcome: JobOutcome,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut conn = self.lock_conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(JobStoreError::backend)?;
        ensure_job(&tx, job_id)?;
        let finalized: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM job_outcomes WHERE job_id = ?1)",
                rusqlite::params![job_id],
                |row| row.get(0),
            )
            .map_err(JobStoreError::backend)?;
        if finalized {
            return Err(JobStoreError::AlreadyFinalized(job_id));
        }
        tx.execute(
            "INSERT INTO job_outcomes (job_id, outcome, reason, finished_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![job_id, outcome.as_str(), reason, format_time(&at)],
        )
        .map_err(JobStoreError::backend)?;
        tx.commit().map_err(JobStoreError::backend)
    }

    fn job(&self, job_id: JobId) -> StoreResult<Option<JobRecord>> {
        let conn = self.lock_conn()?;
        let row = conn
            .query_row(
                &format!("{} WHERE j.id = ?1", SELECT_JOB),
                rusqlite::params![job_id],
                JobRow::from_row,
            )
            .optional()
            .map_err(JobStoreError::backend)?;
        row.map(JobRow::decode).transpose()
    }

    fn scheduled_stages(&self, job_id: JobId) -> StoreResult<Vec<Stage>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare("SELECT stage FROM job_stages WHERE job_id = ?1 ORDER BY position")
            .map_err(JobStoreError::backend)?;
        let rows = stmt
            .query_map(rusqlite::params![job_id], |row| row.get::<_, String>(0))
            .map_err(JobStoreError::backend)?;

        let mut stages = Vec::new();
        for row in rows {
            let stage = row.map_err(JobStoreError::backend)?;
            stages.push(parse_field(&stage)?);
        }
        Ok(stages)
    }

    fn stage_entries(&self, job_id: JobId) -> StoreResult<Vec<StageEntry>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT stage, platform, status, started_at, finished_at, diagnostic
                 FROM stage_entries WHERE job_id = ?1 ORDER BY id",
            )
            .map_err(JobStoreError::backend)?;
        let rows = stmt
            .query_map(rusqlite::params![job_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })
            .map_err(JobStoreError::backend)?;

        let mut entries = Vec::new();
        for row in rows {
            let (stage, platform, status, started_at, finished_at, diagnostic) =
                row.map_err(JobStoreError::backend)?;
            entries.push(StageEntry {
                stage: parse_field(&stage)?,
                platform: parse_field(&platform)?,
                status: parse_field(&status)?,
                started_at: parse_time(&started_at)?,
                finished_at: parse_time(&finished_at)?,
                diagnostic,
            });
        }
        Ok(entries)
    }

    fn transitions(&self, job_id: JobId) -> StoreResult<Vec<Transition>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare("SELECT state, at FROM transitions WHERE job_id = ?1 ORDER BY id")
            .map_err(JobStoreError::backend)?;
        let rows = stmt
            .query_map(rusqlite::params![job_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(JobStoreError::backend)?;

        let mut transitions = Vec::new();
        for row in rows {
            let (state, at) = row.map_err(JobStoreError::backend)?;
            transitions.push(Transition {
                state,
                at: parse_time(&at)?,
            });
        }
        Ok(transitions)
    }

    fn dispatch_attempts(&self, job_id: JobId) -> StoreResult<Vec<DispatchAttempt>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT attempt, succeeded, detail, at
                 FROM dispatch_attempts WHERE job_id = ?1 ORDER BY id",
            )
            .map_err(JobStoreError::backend)?;
        let rows = stmt
            .query_map(rusqlite::params![job_id], |row| {
                Ok((
                    row.get::<_, u32>(0)?,
                    row.get::<_, bool>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(JobStoreError::backend)?;

        let mut attempts = Vec::new();
        for row in rows {
            let (attempt, succeeded, detail, at) = row.map_err(JobStoreError::backend)?;
            attempts.push(DispatchAttempt {
                attempt,
                succeeded,
                detail,
                at: parse_time(&at)?,
            });
        }
        Ok(attempts)
    }

    fn last_job(&self, use_case: &str) -> StoreResult<Option<JobRecord>> {
        let conn = self.lock_conn()?;
        let row = conn
            .query_row(
                &format!(
                    "{} WHERE j.use_case = ?1 AND o.job_id IS NOT NULL ORDER BY j.id DESC LIMIT 1",
                    SELECT_JOB
                ),
                rusqlite::params![use_case],
                JobRow::from_row,
            )
            .optional()
            .map_err(JobStoreError::backend)?;
        row.map(JobRow::decode).transpose()
    }

    fn delete_job(&self, job_id: JobId) -> StoreResult<()> {
        let mut conn = self.lock_conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(JobStoreError::backend)?;
        ensure_job(&tx, job_id)?;
        for table in JOB_TABLES {
            tx.execute(
                &format!("DELETE FROM {} WHERE job_id = ?1", table),
                rusqlite::params![job_id],
            )
            .map_err(JobStoreError::backend)?;
        }
        tx.execute("DELETE FROM jobs WHERE id = ?1", rusqlite::params![job_id])
            .map_err(JobStoreError::backend)?;
        tx.commit().map_err(JobStoreError::backend)
    }

    fn delete_all(&self) -> StoreResult<usize> {
        let mut conn = self.lock_conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(JobStoreError::backend)?;
        for table in JOB_TABLES {
            tx.execute(&format!("DELETE FROM {}", table), [])
                .map_err(JobStoreError::backend)?;
        }
        let removed = tx
            .execute("DELETE FROM jobs", [])
            .map_err(JobStoreError::backend)?;
        tx.commit().map_err(JobStoreError::backend)?;
        Ok(removed)
    }
}
