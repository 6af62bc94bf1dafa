use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::debug;

use crate::error::{Result, TrackError};
use crate::models::{Application, StageInstance, StageTemplate};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// One connection to the shared store. Each worker opens its own.
pub struct Database {
    pub(crate) conn: Connection,
    path: Option<PathBuf>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::configure(&conn)?;
        // readers never block the writer, and writers queue on the busy timeout
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(path = %path.display(), journal_mode = %mode, "opened database");
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Fresh, initialized, private database. Used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;
        let db = Self { conn, path: None };
        db.init()?;
        Ok(db)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn configure(conn: &Connection) -> Result<()> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        // Use XDG data directory or fallback
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "jobtrail") {
            proj_dirs.data_dir().join("jobtrail.db")
        } else {
            PathBuf::from("jobtrail.db")
        }
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS companies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant TEXT NOT NULL,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE (tenant, name COLLATE NOCASE)
            );

            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant TEXT NOT NULL,
                company_id INTEGER REFERENCES companies(id),
                title TEXT NOT NULL,
                url TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS resumes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant TEXT NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS stage_templates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant TEXT NOT NULL,
                name TEXT NOT NULL,
                stage_order INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS applications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant TEXT NOT NULL,
                job_id INTEGER NOT NULL REFERENCES jobs(id),
                resume_id INTEGER,
                name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active'
                    CHECK (status IN ('active', 'on_hold', 'rejected', 'offer', 'archived')),
                current_stage_id INTEGER,
                applied_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- template_id is a weak reference: templates may be deleted underneath it
            CREATE TABLE IF NOT EXISTS application_stages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                application_id INTEGER NOT NULL REFERENCES applications(id) ON DELETE CASCADE,
                template_id INTEGER NOT NULL,
                status TEXT NOT NULL
                    CHECK (status IN ('pending', 'active', 'completed', 'skipped', 'cancelled')),
                stage_order INTEGER NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS comments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant TEXT NOT NULL,
                application_id INTEGER NOT NULL REFERENCES applications(id) ON DELETE CASCADE,
                stage_id INTEGER REFERENCES application_stages(id) ON DELETE SET NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_company ON jobs(company_id);
            CREATE INDEX IF NOT EXISTS idx_templates_tenant ON stage_templates(tenant, stage_order);
            CREATE INDEX IF NOT EXISTS idx_applications_tenant ON applications(tenant, status);
            CREATE INDEX IF NOT EXISTS idx_applications_job ON applications(job_id);
            CREATE INDEX IF NOT EXISTS idx_stages_application ON application_stages(application_id);
            CREATE INDEX IF NOT EXISTS idx_comments_application ON comments(application_id);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> anyhow::Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='application_stages'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(anyhow::anyhow!(
                "Database not initialized. Run 'jobtrail init' first."
            ));
        }
        Ok(())
    }

    /// Begins a write transaction that takes the database write lock up front.
    ///
    /// Read-then-write sequences on an application run inside one of these, so a
    /// concurrent writer waits (up to the busy timeout) instead of interleaving.
    pub(crate) fn write_tx(&self) -> Result<Transaction<'_>> {
        Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .map_err(TrackError::from)
    }
}

// --- Row mapping shared by the core modules ---

pub(crate) const APPLICATION_COLUMNS: &str =
    "a.id, a.job_id, a.resume_id, a.name, a.status, a.current_stage_id,
     a.applied_at, a.created_at, a.updated_at";

pub(crate) fn row_to_application(row: &rusqlite::Row) -> rusqlite::Result<Application> {
    Ok(Application {
        id: row.get(0)?,
        job_id: row.get(1)?,
        resume_id: row.get(2)?,
        name: row.get(3)?,
        status: row.get(4)?,
        current_stage_id: row.get(5)?,
        applied_at: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

pub(crate) const STAGE_SELECT: &str =
    "SELECT s.id, s.application_id, s.template_id, t.name, s.status, s.stage_order,
            s.started_at, s.completed_at, s.created_at
     FROM application_stages s
     LEFT JOIN stage_templates t ON t.id = s.template_id";

pub(crate) fn row_to_stage(row: &rusqlite::Row) -> rusqlite::Result<StageInstance> {
    Ok(StageInstance {
        id: row.get(0)?,
        application_id: row.get(1)?,
        template_id: row.get(2)?,
        stage_name: row.get(3)?,
        status: row.get(4)?,
        order: row.get(5)?,
        started_at: row.get(6)?,
        completed_at: row.get(7)?,
        created_at: row.get(8)?,
    })
}

pub(crate) const TEMPLATE_COLUMNS: &str = "id, name, stage_order, created_at, updated_at";

pub(crate) fn row_to_template(row: &rusqlite::Row) -> rusqlite::Result<StageTemplate> {
    Ok(StageTemplate {
        id: row.get(0)?,
        name: row.get(1)?,
        order: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}
