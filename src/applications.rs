use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{info, warn};

use crate::collaborators::{JobLookup, ResumeLookup};
use crate::db::{APPLICATION_COLUMNS, Database, STAGE_SELECT, row_to_application, row_to_stage};
use crate::error::{Entity, Result, TrackError};
use crate::models::{
    Application, ApplicationStatus, ApplicationView, NewApplication, StageInstance, Tenant,
};
use crate::status::{application_counts, derive_status};

/// Loads an application owned by `tenant`. Another tenant's application is reported
/// as missing.
pub(crate) fn fetch_application(
    conn: &Connection,
    tenant: &Tenant,
    id: i64,
) -> Result<Application> {
    conn.query_row(
        &format!("SELECT {APPLICATION_COLUMNS} FROM applications a WHERE a.tenant = ?1 AND a.id = ?2"),
        params![tenant.as_str(), id],
        row_to_application,
    )
    .optional()?
    .ok_or_else(|| TrackError::not_found(Entity::Application, id))
}

pub(crate) fn fetch_stage(conn: &Connection, stage_id: i64) -> Result<Option<StageInstance>> {
    let stage = conn
        .query_row(
            &format!("{STAGE_SELECT} WHERE s.id = ?1"),
            [stage_id],
            row_to_stage,
        )
        .optional()?;
    Ok(stage)
}

pub(crate) fn count_stages(conn: &Connection, application_id: i64) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM application_stages WHERE application_id = ?1",
        [application_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

impl Database {
    pub fn create_application(&self, tenant: &Tenant, new: NewApplication) -> Result<Application> {
        let job = self
            .find_job(tenant, new.job_id)?
            .ok_or_else(|| TrackError::not_found(Entity::Job, new.job_id))?;

        let name = new
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or(job.title);
        let status = new.status.unwrap_or(ApplicationStatus::Active);
        let now = Utc::now();
        let applied_at = new.applied_at.unwrap_or(now);

        self.conn.execute(
            "INSERT INTO applications
                (tenant, job_id, resume_id, name, status, current_stage_id, applied_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, ?7, ?7)",
            params![tenant.as_str(), job.id, new.resume_id, name, status, applied_at, now],
        )?;
        let id = self.conn.last_insert_rowid();
        info!(%tenant, application_id = id, job_id = job.id, "application created");
        self.get_application(tenant, id)
    }

    pub fn get_application(&self, tenant: &Tenant, id: i64) -> Result<Application> {
        fetch_application(&self.conn, tenant, id)
    }

    pub fn list_applications(
        &self,
        tenant: &Tenant,
        status: Option<ApplicationStatus>,
    ) -> Result<Vec<Application>> {
        let mut sql = format!("SELECT {APPLICATION_COLUMNS} FROM applications a WHERE a.tenant = ?1");
        if status.is_some() {
            sql.push_str(" AND a.status = ?2");
        }
        sql.push_str(" ORDER BY a.applied_at DESC, a.id DESC");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = match status {
            Some(s) => stmt.query_map(params![tenant.as_str(), s], row_to_application)?,
            None => stmt.query_map(params![tenant.as_str()], row_to_application)?,
        };
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Sets the coarse outcome label. Stage history is untouched.
    pub fn set_application_status(&self, tenant: &Tenant, id: i64, status: &str) -> Result<Application> {
        let status: ApplicationStatus = status.parse()?;
        self.update_application_field(tenant, id, "status", &status)?;
        self.get_application(tenant, id)
    }

    pub fn rename_application(&self, tenant: &Tenant, id: i64, name: &str) -> Result<Application> {
        let name = name.trim();
        let name = if name.is_empty() {
            let app = self.get_application(tenant, id)?;
            self.find_job(tenant, app.job_id)?
                .map(|job| job.title)
                .unwrap_or(app.name)
        } else {
            name.to_string()
        };
        self.update_application_field(tenant, id, "name", &name)?;
        self.get_application(tenant, id)
    }

    /// Removes the application together with its stages and comments.
    pub fn delete_application(&self, tenant: &Tenant, id: i64) -> Result<()> {
        let deleted = self.conn.execute(
            "DELETE FROM applications WHERE tenant = ?1 AND id = ?2",
            params![tenant.as_str(), id],
        )?;
        if deleted == 0 {
            return Err(TrackError::not_found(Entity::Application, id));
        }
        info!(%tenant, application_id = id, "application deleted");
        Ok(())
    }

    fn update_application_field(
        &self,
        tenant: &Tenant,
        id: i64,
        column: &'static str,
        value: &dyn rusqlite::ToSql,
    ) -> Result<()> {
        let updated = self.conn.execute(
            &format!("UPDATE applications SET {column} = ?1, updated_at = ?2 WHERE tenant = ?3 AND id = ?4"),
            params![value, Utc::now(), tenant.as_str(), id],
        )?;
        if updated == 0 {
            return Err(TrackError::not_found(Entity::Application, id));
        }
        Ok(())
    }

    /// Application joined with its job, company, resume, and current stage.
    ///
    /// Display lookups that fail degrade to `None` rather than failing the read.
    pub fn application_view(&self, tenant: &Tenant, id: i64) -> Result<ApplicationView> {
        let application = self.get_application(tenant, id)?;
        self.build_view(tenant, application)
    }

    pub fn list_application_views(
        &self,
        tenant: &Tenant,
        status: Option<ApplicationStatus>,
    ) -> Result<Vec<ApplicationView>> {
        self.list_applications(tenant, status)?
            .into_iter()
            .map(|app| self.build_view(tenant, app))
            .collect()
    }

    fn build_view(&self, tenant: &Tenant, application: Application) -> Result<ApplicationView> {
        let job = self.find_job(tenant, application.job_id).unwrap_or_else(|e| {
            warn!(application_id = application.id, error = %e, "job lookup failed");
            None
        });

        let resume_title = match application.resume_id {
            Some(resume_id) => match self.find_resume(tenant, resume_id) {
                Ok(resume) => resume.map(|r| r.title),
                Err(e) => {
                    warn!(application_id = application.id, resume_id, error = %e, "resume lookup failed");
                    None
                }
            },
            None => None,
        };

        let current_stage = match application.current_stage_id {
            Some(stage_id) => fetch_stage(&self.conn, stage_id)?,
            None => None,
        };
        let stage_count = count_stages(&self.conn, application.id)?;
        let derived_status = derive_status(application_counts(&application, stage_count));

        Ok(ApplicationView {
            job_title: job.as_ref().map(|j| j.title.clone()),
            company_name: job.and_then(|j| j.company_name),
            resume_title,
            current_stage,
            stage_count,
            derived_status,
            application,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DerivedStatus;

    fn setup() -> (Database, Tenant, i64) {
        let db = Database::open_in_memory().unwrap();
        let tenant = Tenant::new("alice");
        let job = db
            .add_job(&tenant, Some("Acme"), "Backend Engineer", None)
            .unwrap();
        (db, tenant, job)
    }

    #[test]
    fn blank_name_defaults_to_job_title() {
        let (db, tenant, job) = setup();
        let app = db
            .create_application(
                &tenant,
                NewApplication {
                    job_id: job,
                    name: Some("   ".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(app.name, "Backend Engineer");
        assert_eq!(app.status, ApplicationStatus::Active);
        assert_eq!(app.current_stage_id, None);
    }

    #[test]
    fn explicit_name_is_kept() {
        let (db, tenant, job) = setup();
        let app = db
            .create_application(
                &tenant,
                NewApplication {
                    job_id: job,
                    name: Some("Acme referral".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(app.name, "Acme referral");
    }

    #[test]
    fn unknown_or_foreign_job_is_not_found() {
        let (db, _, job) = setup();
        let err = db
            .create_application(
                &Tenant::new("bob"),
                NewApplication {
                    job_id: job,
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, TrackError::NotFound { entity: Entity::Job, .. }));
    }

    #[test]
    fn status_updates_validate_input() {
        let (db, tenant, job) = setup();
        let app = db
            .create_application(&tenant, NewApplication { job_id: job, ..Default::default() })
            .unwrap();

        let updated = db.set_application_status(&tenant, app.id, "offer").unwrap();
        assert_eq!(updated.status, ApplicationStatus::Offer);

        let err = db.set_application_status(&tenant, app.id, "hired").unwrap_err();
        assert_eq!(err.code(), "INVALID_STATUS");
        assert_eq!(
            db.get_application(&tenant, app.id).unwrap().status,
            ApplicationStatus::Offer
        );
    }

    #[test]
    fn list_filters_by_status_and_tenant() {
        let (db, tenant, job) = setup();
        let a = db
            .create_application(&tenant, NewApplication { job_id: job, ..Default::default() })
            .unwrap();
        db.create_application(
            &tenant,
            NewApplication {
                job_id: job,
                status: Some(ApplicationStatus::Rejected),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(db.list_applications(&tenant, None).unwrap().len(), 2);
        let active = db
            .list_applications(&tenant, Some(ApplicationStatus::Active))
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, a.id);
        assert!(db.list_applications(&Tenant::new("bob"), None).unwrap().is_empty());
    }

    #[test]
    fn missing_resume_degrades_the_view() {
        let (db, tenant, job) = setup();
        let app = db
            .create_application(
                &tenant,
                NewApplication {
                    job_id: job,
                    resume_id: Some(999),
                    ..Default::default()
                },
            )
            .unwrap();

        let view = db.application_view(&tenant, app.id).unwrap();
        assert_eq!(view.resume_title, None);
        assert_eq!(view.job_title.as_deref(), Some("Backend Engineer"));
        assert_eq!(view.company_name.as_deref(), Some("Acme"));
        assert_eq!(view.stage_count, 0);
        assert_eq!(view.derived_status, DerivedStatus::Active);
    }

    #[test]
    fn rename_to_blank_restores_job_title() {
        let (db, tenant, job) = setup();
        let app = db
            .create_application(
                &tenant,
                NewApplication {
                    job_id: job,
                    name: Some("Custom".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(db.rename_application(&tenant, app.id, "Other").unwrap().name, "Other");
        assert_eq!(
            db.rename_application(&tenant, app.id, "").unwrap().name,
            "Backend Engineer"
        );
    }

    #[test]
    fn delete_is_tenant_scoped() {
        let (db, tenant, job) = setup();
        let app = db
            .create_application(&tenant, NewApplication { job_id: job, ..Default::default() })
            .unwrap();
        assert!(db.delete_application(&Tenant::new("bob"), app.id).unwrap_err().is_not_found());
        db.delete_application(&tenant, app.id).unwrap();
        assert!(db.get_application(&tenant, app.id).unwrap_err().is_not_found());
    }
}
