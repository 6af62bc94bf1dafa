//! Seams to records the stage engine consumes but does not own.

use crate::error::Result;
use crate::models::{Job, Resume, Tenant};

pub trait JobLookup {
    fn find_job(&self, tenant: &Tenant, job_id: i64) -> Result<Option<Job>>;
}

pub trait ResumeLookup {
    fn find_resume(&self, tenant: &Tenant, resume_id: i64) -> Result<Option<Resume>>;
}

/// Side notes attached to an application, optionally to one of its stages.
///
/// Callers treat writes as fire-and-forget: a failure is logged, never propagated.
pub trait CommentStore {
    fn create_comment(
        &self,
        tenant: &Tenant,
        application_id: i64,
        stage_id: Option<i64>,
        content: &str,
    ) -> Result<i64>;
}
