use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::error::TrackError;

/// Verified owner scope. Every lookup and write is filtered by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tenant(String);

impl Tenant {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// --- Status enums ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Active,
    OnHold,
    Rejected,
    Offer,
    Archived,
}

impl ApplicationStatus {
    pub const ALL: &'static str = "active, on_hold, rejected, offer, archived";

    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Active => "active",
            ApplicationStatus::OnHold => "on_hold",
            ApplicationStatus::Rejected => "rejected",
            ApplicationStatus::Offer => "offer",
            ApplicationStatus::Archived => "archived",
        }
    }
}

impl FromStr for ApplicationStatus {
    type Err = TrackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "active" => Ok(ApplicationStatus::Active),
            "on_hold" => Ok(ApplicationStatus::OnHold),
            "rejected" => Ok(ApplicationStatus::Rejected),
            "offer" => Ok(ApplicationStatus::Offer),
            "archived" => Ok(ApplicationStatus::Archived),
            other => Err(TrackError::InvalidStatus {
                value: other.to_string(),
                expected: Self::ALL,
            }),
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a single stage instance.
///
/// `Pending` and `Active` are open; `Completed`, `Skipped` and `Cancelled` are closed.
/// Only `Completed` is auto-stamped with a completion time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Active,
    Completed,
    Skipped,
    Cancelled,
}

impl StageStatus {
    pub const ALL: &'static str = "pending, active, completed, skipped, cancelled";

    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Active => "active",
            StageStatus::Completed => "completed",
            StageStatus::Skipped => "skipped",
            StageStatus::Cancelled => "cancelled",
        }
    }

    /// Pending or active: a stage moved back here loses its completion time.
    pub fn is_open(&self) -> bool {
        matches!(self, StageStatus::Pending | StageStatus::Active)
    }

    /// Counts as progress when picking a new current stage after a delete.
    pub fn marks_progress(&self) -> bool {
        matches!(self, StageStatus::Active | StageStatus::Completed)
    }
}

impl FromStr for StageStatus {
    type Err = TrackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pending" => Ok(StageStatus::Pending),
            "active" => Ok(StageStatus::Active),
            "completed" => Ok(StageStatus::Completed),
            "skipped" => Ok(StageStatus::Skipped),
            "cancelled" => Ok(StageStatus::Cancelled),
            other => Err(TrackError::InvalidStatus {
                value: other.to_string(),
                expected: Self::ALL,
            }),
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! sql_text_enum {
    ($ty:ty) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: TrackError| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

sql_text_enum!(ApplicationStatus);
sql_text_enum!(StageStatus);

/// Read-time classification of a company or application. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivedStatus {
    Idle,
    Active,
    Interviewing,
}

impl DerivedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DerivedStatus::Idle => "idle",
            DerivedStatus::Active => "active",
            DerivedStatus::Interviewing => "interviewing",
        }
    }
}

impl fmt::Display for DerivedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Supporting records ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    pub id: i64,
    pub name: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub company_id: Option<i64>,
    pub company_name: Option<String>, // denormalized for convenience
    pub title: String,
    pub url: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resume {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub application_id: i64,
    pub stage_id: Option<i64>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

// --- Core records ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTemplate {
    pub id: i64,
    pub name: String,
    pub order: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: i64,
    pub job_id: i64,
    pub resume_id: Option<i64>,
    pub name: String,
    pub status: ApplicationStatus,
    pub current_stage_id: Option<i64>,
    pub applied_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageInstance {
    pub id: i64,
    pub application_id: i64,
    pub template_id: i64,
    /// Resolved from the template at read time; `None` once the template is gone.
    pub stage_name: Option<String>,
    pub status: StageStatus,
    pub order: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewApplication {
    pub job_id: i64,
    pub resume_id: Option<i64>,
    pub name: Option<String>,
    pub status: Option<ApplicationStatus>,
    pub applied_at: Option<DateTime<Utc>>,
}

/// Application joined with everything a reader wants to display.
#[derive(Debug, Clone, Serialize)]
pub struct ApplicationView {
    #[serde(flatten)]
    pub application: Application,
    pub job_title: Option<String>,
    pub company_name: Option<String>,
    pub resume_title: Option<String>,
    pub current_stage: Option<StageInstance>,
    pub stage_count: i64,
    pub derived_status: DerivedStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub applications: i64,
    pub active_applications: i64,
    pub max_stages: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompanySummary {
    pub company: Company,
    pub counts: StatusCounts,
    pub derived_status: DerivedStatus,
}
