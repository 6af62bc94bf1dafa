//! Derived status: computed from aggregated counts on every read, never stored.

use rusqlite::params;

use crate::db::Database;
use crate::error::Result;
use crate::models::{
    Application, ApplicationStatus, Company, CompanySummary, DerivedStatus, StatusCounts, Tenant,
};

/// First match wins: no applications, then more than one stage anywhere, then any
/// active application.
pub fn derive_status(counts: StatusCounts) -> DerivedStatus {
    if counts.applications == 0 {
        DerivedStatus::Idle
    } else if counts.max_stages > 1 {
        DerivedStatus::Interviewing
    } else if counts.active_applications > 0 {
        DerivedStatus::Active
    } else {
        DerivedStatus::Idle
    }
}

/// A single application viewed as a company of one.
pub fn application_counts(application: &Application, stage_count: i64) -> StatusCounts {
    StatusCounts {
        applications: 1,
        active_applications: i64::from(application.status == ApplicationStatus::Active),
        max_stages: stage_count,
    }
}

impl Database {
    pub fn company_summaries(&self, tenant: &Tenant) -> Result<Vec<CompanySummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.id, c.name, c.created_at,
                    COUNT(DISTINCT a.id),
                    COUNT(DISTINCT CASE WHEN a.status = ?2 THEN a.id END),
                    COALESCE(MAX(sc.stage_count), 0)
             FROM companies c
             LEFT JOIN jobs j ON j.company_id = c.id AND j.tenant = c.tenant
             LEFT JOIN applications a ON a.job_id = j.id AND a.tenant = c.tenant
             LEFT JOIN (
                 SELECT application_id, COUNT(*) AS stage_count
                 FROM application_stages
                 GROUP BY application_id
             ) sc ON sc.application_id = a.id
             WHERE c.tenant = ?1
             GROUP BY c.id
             ORDER BY c.name",
        )?;

        let rows = stmt.query_map(params![tenant.as_str(), ApplicationStatus::Active], |row| {
            let counts = StatusCounts {
                applications: row.get(3)?,
                active_applications: row.get(4)?,
                max_stages: row.get(5)?,
            };
            Ok(CompanySummary {
                company: Company {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_at: row.get(2)?,
                },
                counts,
                derived_status: derive_status(counts),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn company_summary(&self, tenant: &Tenant, company_id: i64) -> Result<Option<CompanySummary>> {
        Ok(self
            .company_summaries(tenant)?
            .into_iter()
            .find(|s| s.company.id == company_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(applications: i64, active_applications: i64, max_stages: i64) -> StatusCounts {
        StatusCounts {
            applications,
            active_applications,
            max_stages,
        }
    }

    #[test]
    fn no_applications_is_idle() {
        assert_eq!(derive_status(counts(0, 0, 0)), DerivedStatus::Idle);
    }

    #[test]
    fn more_than_one_stage_is_interviewing_regardless_of_activity() {
        assert_eq!(derive_status(counts(1, 0, 2)), DerivedStatus::Interviewing);
        assert_eq!(derive_status(counts(3, 3, 5)), DerivedStatus::Interviewing);
    }

    #[test]
    fn single_stage_with_active_application_is_active() {
        assert_eq!(derive_status(counts(2, 1, 1)), DerivedStatus::Active);
        assert_eq!(derive_status(counts(1, 1, 0)), DerivedStatus::Active);
    }

    #[test]
    fn inactive_applications_without_progress_are_idle() {
        assert_eq!(derive_status(counts(2, 0, 1)), DerivedStatus::Idle);
    }

    #[test]
    fn companies_without_jobs_are_idle() {
        let db = Database::open_in_memory().unwrap();
        let tenant = Tenant::new("alice");
        db.get_or_create_company(&tenant, "Acme").unwrap();

        let summaries = db.company_summaries(&tenant).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].counts, StatusCounts::default());
        assert_eq!(summaries[0].derived_status, DerivedStatus::Idle);
    }
}
