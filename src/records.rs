use chrono::Utc;
use rusqlite::{OptionalExtension, params};

use crate::collaborators::{CommentStore, JobLookup, ResumeLookup};
use crate::db::Database;
use crate::error::{Entity, Result, TrackError};
use crate::models::{Comment, Company, Job, Resume, Tenant};

impl Database {
    // --- Company operations ---

    pub fn get_or_create_company(&self, tenant: &Tenant, name: &str) -> Result<i64> {
        let name = name.trim();
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM companies WHERE tenant = ?1 AND LOWER(name) = LOWER(?2)",
                params![tenant.as_str(), name],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            return Ok(id);
        }

        self.conn.execute(
            "INSERT INTO companies (tenant, name) VALUES (?1, ?2)",
            params![tenant.as_str(), name],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn list_companies(&self, tenant: &Tenant) -> Result<Vec<Company>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, created_at FROM companies WHERE tenant = ?1 ORDER BY name",
        )?;
        let rows = stmt.query_map([tenant.as_str()], row_to_company)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // --- Job operations ---

    pub fn add_job(
        &self,
        tenant: &Tenant,
        company: Option<&str>,
        title: &str,
        url: Option<&str>,
    ) -> Result<i64> {
        let company_id = match company.map(str::trim).filter(|c| !c.is_empty()) {
            Some(name) => Some(self.get_or_create_company(tenant, name)?),
            None => None,
        };

        self.conn.execute(
            "INSERT INTO jobs (tenant, company_id, title, url) VALUES (?1, ?2, ?3, ?4)",
            params![tenant.as_str(), company_id, title.trim(), url],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn list_jobs(&self, tenant: &Tenant) -> Result<Vec<Job>> {
        let mut stmt = self.conn.prepare(
            "SELECT j.id, j.company_id, c.name, j.title, j.url, j.created_at
             FROM jobs j
             LEFT JOIN companies c ON j.company_id = c.id
             WHERE j.tenant = ?1
             ORDER BY j.created_at DESC, j.id DESC",
        )?;
        let rows = stmt.query_map([tenant.as_str()], row_to_job)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_job(&self, tenant: &Tenant, id: i64) -> Result<Job> {
        self.find_job(tenant, id)?
            .ok_or_else(|| TrackError::not_found(Entity::Job, id))
    }

    // --- Resume operations ---

    pub fn add_resume(&self, tenant: &Tenant, title: &str, content: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO resumes (tenant, title, content) VALUES (?1, ?2, ?3)",
            params![tenant.as_str(), title.trim(), content],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn list_resumes(&self, tenant: &Tenant) -> Result<Vec<Resume>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, content, created_at FROM resumes WHERE tenant = ?1 ORDER BY title",
        )?;
        let rows = stmt.query_map([tenant.as_str()], row_to_resume)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // --- Comment operations ---

    pub fn list_comments(&self, tenant: &Tenant, application_id: i64) -> Result<Vec<Comment>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, application_id, stage_id, content, created_at
             FROM comments
             WHERE tenant = ?1 AND application_id = ?2
             ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(params![tenant.as_str(), application_id], |row| {
            Ok(Comment {
                id: row.get(0)?,
                application_id: row.get(1)?,
                stage_id: row.get(2)?,
                content: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

impl JobLookup for Database {
    fn find_job(&self, tenant: &Tenant, job_id: i64) -> Result<Option<Job>> {
        let job = self
            .conn
            .query_row(
                "SELECT j.id, j.company_id, c.name, j.title, j.url, j.created_at
                 FROM jobs j
                 LEFT JOIN companies c ON j.company_id = c.id
                 WHERE j.tenant = ?1 AND j.id = ?2",
                params![tenant.as_str(), job_id],
                row_to_job,
            )
            .optional()?;
        Ok(job)
    }
}

impl ResumeLookup for Database {
    fn find_resume(&self, tenant: &Tenant, resume_id: i64) -> Result<Option<Resume>> {
        let resume = self
            .conn
            .query_row(
                "SELECT id, title, content, created_at FROM resumes WHERE tenant = ?1 AND id = ?2",
                params![tenant.as_str(), resume_id],
                row_to_resume,
            )
            .optional()?;
        Ok(resume)
    }
}

impl CommentStore for Database {
    fn create_comment(
        &self,
        tenant: &Tenant,
        application_id: i64,
        stage_id: Option<i64>,
        content: &str,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO comments (tenant, application_id, stage_id, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![tenant.as_str(), application_id, stage_id, content, Utc::now()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }
}

fn row_to_company(row: &rusqlite::Row) -> rusqlite::Result<Company> {
    Ok(Company {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
    })
}

fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
    Ok(Job {
        id: row.get(0)?,
        company_id: row.get(1)?,
        company_name: row.get(2)?,
        title: row.get(3)?,
        url: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn row_to_resume(row: &rusqlite::Row) -> rusqlite::Result<Resume> {
    Ok(Resume {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        created_at: row.get(3)?,
    })
}
