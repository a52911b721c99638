use crate::research::state::{Checkpoint, Job, JobStatus, JobSummary, Section};
use crate::search::Citation;
use crate::types::{AppError, Result};
use chrono::{DateTime, Utc};
use libsql::params::Params;
use libsql::{Builder, Connection, Database, Row, Value};
use std::path::Path;
use tokio::sync::Mutex;

const JOB_COLUMNS: &str = "id, owner_id, topic, config, status, progress, is_question, \
     introduction, conclusion, final_report, error, waiting_for_feedback, checkpoint, \
     created_at, updated_at, completed_at";

/// libsql-backed job store
///
/// A single connection is shared behind an async mutex, which serializes
/// every read and write. In-memory databases live exactly as long as that
/// connection.
pub struct TursoClient {
    _db: Database,
    conn: Mutex<Connection>,
}

impl TursoClient {
    /// Throwaway in-memory database
    pub async fn new_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| AppError::Database(format!("Failed to open in-memory database: {}", e)))?;
        Self::open(db).await
    }

    /// File-backed SQLite database; parent directories are created
    pub async fn new_local(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    AppError::Database(format!("Failed to create {}: {}", parent.display(), e))
                })?;
            }
        }

        let db = Builder::new_local(path)
            .build()
            .await
            .map_err(|e| AppError::Database(format!("Failed to open {}: {}", path.display(), e)))?;
        Self::open(db).await
    }

    /// Remote Turso database
    pub async fn new_remote(url: String, auth_token: String) -> Result<Self> {
        let db = Builder::new_remote(url, auth_token)
            .build()
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Turso: {}", e)))?;
        Self::open(db).await
    }

    async fn open(db: Database) -> Result<Self> {
        let conn = db
            .connect()
            .map_err(|e| AppError::Database(format!("Failed to get connection: {}", e)))?;
        let client = Self {
            _db: db,
            conn: Mutex::new(conn),
        };
        client.initialize_schema().await?;
        Ok(client)
    }

    async fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock().await;

        // Jobs table
        conn.execute(
            "CREATE TABLE IF NOT EXISTS research_jobs (
                id TEXT PRIMARY KEY,
                owner_id TEXT,
                topic TEXT NOT NULL,
                config TEXT NOT NULL,
                status TEXT NOT NULL,
                progress REAL NOT NULL,
                is_question INTEGER NOT NULL,
                introduction TEXT,
                conclusion TEXT,
                final_report TEXT,
                error TEXT,
                waiting_for_feedback INTEGER NOT NULL,
                checkpoint TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                completed_at INTEGER
            )",
            (),
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to create research_jobs table: {}", e)))?;

        // Sections table
        conn.execute(
            "CREATE TABLE IF NOT EXISTS research_sections (
                job_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                content TEXT NOT NULL,
                search_options TEXT NOT NULL,
                is_completed INTEGER NOT NULL,
                PRIMARY KEY (job_id, position),
                FOREIGN KEY (job_id) REFERENCES research_jobs(id)
            )",
            (),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to create research_sections table: {}", e))
        })?;

        // References table
        conn.execute(
            "CREATE TABLE IF NOT EXISTS research_urls (
                job_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                title TEXT NOT NULL,
                url TEXT NOT NULL,
                PRIMARY KEY (job_id, position),
                FOREIGN KEY (job_id) REFERENCES research_jobs(id)
            )",
            (),
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to create research_urls table: {}", e)))?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_research_jobs_owner
             ON research_jobs(owner_id, created_at)",
            (),
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to create owner index: {}", e)))?;

        Ok(())
    }

    // Job operations
    pub async fn save_job(&self, job: &Job) -> Result<()> {
        let sql = format!(
            "INSERT INTO research_jobs ({JOB_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
             ON CONFLICT(id) DO UPDATE SET
                owner_id = excluded.owner_id,
                topic = excluded.topic,
                config = excluded.config,
                status = excluded.status,
                progress = excluded.progress,
                is_question = excluded.is_question,
                introduction = excluded.introduction,
                conclusion = excluded.conclusion,
                final_report = excluded.final_report,
                error = excluded.error,
                waiting_for_feedback = excluded.waiting_for_feedback,
                checkpoint = excluded.checkpoint,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                completed_at = excluded.completed_at"
        );
        self.write_job(&sql, job).await.map(|_| ())
    }

    pub async fn update_job(&self, job: &Job) -> Result<bool> {
        let sql = "UPDATE research_jobs SET
                owner_id = ?2, topic = ?3, config = ?4, status = ?5, progress = ?6,
                is_question = ?7, introduction = ?8, conclusion = ?9, final_report = ?10,
                error = ?11, waiting_for_feedback = ?12, checkpoint = ?13,
                created_at = ?14, updated_at = ?15, completed_at = ?16
             WHERE id = ?1";
        self.write_job(sql, job).await
    }

    /// Run the job statement and, if it touched a row, replace the job's
    /// sections and references in the same transaction.
    async fn write_job(&self, sql: &str, job: &Job) -> Result<bool> {
        let params = job_params(job)?;
        let conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        let written = async {
            let changed = tx
                .execute(sql, Params::Positional(params))
                .await
                .map_err(|e| AppError::Database(format!("Failed to write job: {}", e)))?;
            if changed == 0 {
                return Ok(false);
            }
            replace_children(&tx, job).await?;
            Ok::<bool, AppError>(true)
        }
        .await;

        match written {
            Ok(true) => {
                tx.commit()
                    .await
                    .map_err(|e| AppError::Database(format!("Failed to commit job: {}", e)))?;
                Ok(true)
            }
            Ok(false) => {
                tx.rollback()
                    .await
                    .map_err(|e| AppError::Database(format!("Failed to roll back: {}", e)))?;
                Ok(false)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let conn = self.conn.lock().await;

        let mut rows = conn
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM research_jobs WHERE id = ?"),
                [id],
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to query job: {}", e)))?;

        let Some(row) = rows
            .next()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
        else {
            return Ok(None);
        };
        let mut job = job_from_row(&row)?;

        let mut rows = conn
            .query(
                "SELECT name, description, content, search_options, is_completed
                 FROM research_sections WHERE job_id = ? ORDER BY position ASC",
                [id],
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to query sections: {}", e)))?;
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
        {
            job.sections.push(Section {
                name: text(&row, 0)?,
                description: text(&row, 1)?,
                content: text(&row, 2)?,
                search_options: serde_json::from_str(&text(&row, 3)?)?,
                completed: int(&row, 4)? != 0,
            });
        }

        let mut rows = conn
            .query(
                "SELECT title, url FROM research_urls WHERE job_id = ? ORDER BY position ASC",
                [id],
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to query references: {}", e)))?;
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
        {
            job.all_urls.push(Citation {
                title: text(&row, 0)?,
                url: text(&row, 1)?,
            });
        }

        Ok(Some(job))
    }

    pub async fn list_jobs(&self, owner_id: Option<&str>) -> Result<Vec<JobSummary>> {
        let (filter, params) = match owner_id {
            Some(owner) => (
                "WHERE j.owner_id = ?1",
                Params::Positional(vec![Value::Text(owner.to_string())]),
            ),
            None => ("", Params::None),
        };
        let sql = format!(
            "SELECT j.id, j.topic, j.status, j.progress, j.owner_id, j.created_at, j.updated_at,
                (SELECT COUNT(*) FROM research_sections s
                  WHERE s.job_id = j.id AND s.is_completed = 1),
                (SELECT COUNT(*) FROM research_sections s WHERE s.job_id = j.id)
             FROM research_jobs j {filter}
             ORDER BY j.created_at DESC, j.rowid DESC"
        );

        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(&sql, params)
            .await
            .map_err(|e| AppError::Database(format!("Failed to list jobs: {}", e)))?;

        let mut jobs = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
        {
            jobs.push(JobSummary {
                id: text(&row, 0)?,
                topic: text(&row, 1)?,
                status: text(&row, 2)?.parse::<JobStatus>()?,
                progress: real(&row, 3)? as f32,
                owner_id: opt_text(&row, 4)?,
                created_at: from_millis(int(&row, 5)?)?,
                updated_at: from_millis(int(&row, 6)?)?,
                completed_section_count: int(&row, 7)? as usize,
                section_count: int(&row, 8)? as usize,
            });
        }

        Ok(jobs)
    }

    pub async fn delete_job(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        let deleted = async {
            delete_children(&tx, id).await?;
            tx.execute("DELETE FROM research_jobs WHERE id = ?", [id])
                .await
                .map_err(|e| AppError::Database(format!("Failed to delete job: {}", e)))
        }
        .await;

        match deleted {
            Ok(changed) => {
                tx.commit()
                    .await
                    .map_err(|e| AppError::Database(format!("Failed to commit delete: {}", e)))?;
                Ok(changed > 0)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    pub async fn list_resumable_jobs(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT id FROM research_jobs
                 WHERE status NOT IN ('completed', 'error', 'waiting_for_feedback')
                 ORDER BY created_at ASC, rowid ASC",
                (),
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to list resumable jobs: {}", e)))?;

        let mut ids = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
        {
            ids.push(text(&row, 0)?);
        }
        Ok(ids)
    }
}

fn job_params(job: &Job) -> Result<Vec<Value>> {
    Ok(vec![
        Value::Text(job.id.clone()),
        opt_value(&job.owner_id),
        Value::Text(job.topic.clone()),
        Value::Text(serde_json::to_string(&job.config)?),
        Value::Text(job.status.as_str().to_string()),
        Value::Real(f64::from(job.progress)),
        Value::Integer(i64::from(job.is_question)),
        opt_value(&job.introduction),
        opt_value(&job.conclusion),
        opt_value(&job.final_report),
        opt_value(&job.error),
        Value::Integer(i64::from(job.waiting_for_feedback)),
        Value::Text(serde_json::to_string(&job.checkpoint)?),
        Value::Integer(job.created_at.timestamp_millis()),
        Value::Integer(job.updated_at.timestamp_millis()),
        job.completed_at
            .map(|t| Value::Integer(t.timestamp_millis()))
            .unwrap_or(Value::Null),
    ])
}

fn job_from_row(row: &Row) -> Result<Job> {
    let checkpoint: Checkpoint = serde_json::from_str(&text(row, 12)?)?;
    Ok(Job {
        id: text(row, 0)?,
        owner_id: opt_text(row, 1)?,
        topic: text(row, 2)?,
        config: serde_json::from_str(&text(row, 3)?)?,
        status: text(row, 4)?.parse()?,
        progress: real(row, 5)? as f32,
        sections: Vec::new(),
        is_question: int(row, 6)? != 0,
        introduction: opt_text(row, 7)?,
        conclusion: opt_text(row, 8)?,
        final_report: opt_text(row, 9)?,
        all_urls: Vec::new(),
        error: opt_text(row, 10)?,
        waiting_for_feedback: int(row, 11)? != 0,
        checkpoint,
        created_at: from_millis(int(row, 13)?)?,
        updated_at: from_millis(int(row, 14)?)?,
        completed_at: match row.get_value(15).map_err(|e| AppError::Database(e.to_string()))? {
            Value::Integer(ms) => Some(from_millis(ms)?),
            _ => None,
        },
    })
}

async fn delete_children(conn: &Connection, job_id: &str) -> Result<()> {
    conn.execute("DELETE FROM research_sections WHERE job_id = ?", [job_id])
        .await
        .map_err(|e| AppError::Database(format!("Failed to delete sections: {}", e)))?;
    conn.execute("DELETE FROM research_urls WHERE job_id = ?", [job_id])
        .await
        .map_err(|e| AppError::Database(format!("Failed to delete references: {}", e)))?;
    Ok(())
}

async fn replace_children(conn: &Connection, job: &Job) -> Result<()> {
    delete_children(conn, &job.id).await?;

    for (position, section) in job.sections.iter().enumerate() {
        conn.execute(
            "INSERT INTO research_sections
                (job_id, position, name, description, content, search_options, is_completed)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            Params::Positional(vec![
                Value::Text(job.id.clone()),
                Value::Integer(position as i64),
                Value::Text(section.name.clone()),
                Value::Text(section.description.clone()),
                Value::Text(section.content.clone()),
                Value::Text(serde_json::to_string(&section.search_options)?),
                Value::Integer(i64::from(section.completed)),
            ]),
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to insert section: {}", e)))?;
    }

    for (position, citation) in job.all_urls.iter().enumerate() {
        conn.execute(
            "INSERT INTO research_urls (job_id, position, title, url) VALUES (?, ?, ?, ?)",
            Params::Positional(vec![
                Value::Text(job.id.clone()),
                Value::Integer(position as i64),
                Value::Text(citation.title.clone()),
                Value::Text(citation.url.clone()),
            ]),
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to insert reference: {}", e)))?;
    }

    Ok(())
}

fn opt_value(value: &Option<String>) -> Value {
    value.clone().map(Value::Text).unwrap_or(Value::Null)
}

fn text(row: &Row, idx: i32) -> Result<String> {
    row.get::<String>(idx)
        .map_err(|e| AppError::Database(e.to_string()))
}

fn opt_text(row: &Row, idx: i32) -> Result<Option<String>> {
    match row
        .get_value(idx)
        .map_err(|e| AppError::Database(e.to_string()))?
    {
        Value::Null => Ok(None),
        Value::Text(s) => Ok(Some(s)),
        other => Err(AppError::Database(format!(
            "Expected text in column {}, found {:?}",
            idx, other
        ))),
    }
}

fn int(row: &Row, idx: i32) -> Result<i64> {
    row.get::<i64>(idx)
        .map_err(|e| AppError::Database(e.to_string()))
}

fn real(row: &Row, idx: i32) -> Result<f64> {
    match row
        .get_value(idx)
        .map_err(|e| AppError::Database(e.to_string()))?
    {
        Value::Real(v) => Ok(v),
        Value::Integer(v) => Ok(v as f64),
        other => Err(AppError::Database(format!(
            "Expected a number in column {}, found {:?}",
            idx, other
        ))),
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| AppError::Database(format!("Invalid timestamp {}", ms)))
}
