use std::fmt;

use thiserror::Error;

pub type Result<T, E = TrackError> = std::result::Result<T, E>;

/// The kind of record a lookup failed to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Application,
    Stage,
    Template,
    Job,
    Company,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Entity::Application => "application",
            Entity::Stage => "stage",
            Entity::Template => "stage template",
            Entity::Job => "job",
            Entity::Company => "company",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum TrackError {
    #[error("{entity} #{id} not found")]
    NotFound { entity: Entity, id: i64 },

    #[error("stage #{stage_id} does not belong to application #{application_id}")]
    ApplicationStageNotFound { application_id: i64, stage_id: i64 },

    #[error("invalid status '{value}' (expected one of: {expected})")]
    InvalidStatus {
        value: String,
        expected: &'static str,
    },

    #[error("stage name is required")]
    NameRequired,

    #[error("internal error")]
    Internal(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl TrackError {
    pub fn not_found(entity: Entity, id: i64) -> Self {
        TrackError::NotFound { entity, id }
    }

    pub fn code(&self) -> &'static str {
        match self {
            TrackError::NotFound { .. } => "NOT_FOUND",
            TrackError::ApplicationStageNotFound { .. } => "APPLICATION_STAGE_NOT_FOUND",
            TrackError::InvalidStatus { .. } => "INVALID_STATUS",
            TrackError::NameRequired => "STAGE_NAME_REQUIRED",
            TrackError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP-equivalent status for callers that front this with a request layer.
    pub fn status(&self) -> u16 {
        match self {
            TrackError::NotFound { .. } | TrackError::ApplicationStageNotFound { .. } => 404,
            TrackError::InvalidStatus { .. } | TrackError::NameRequired => 400,
            TrackError::Internal(_) => 500,
        }
    }

    /// Message safe to hand back to a caller. Internal failures stay generic.
    pub fn public_message(&self) -> String {
        self.to_string()
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            TrackError::NotFound { .. } | TrackError::ApplicationStageNotFound { .. }
        )
    }
}

impl From<rusqlite::Error> for TrackError {
    fn from(err: rusqlite::Error) -> Self {
        TrackError::Internal(Box::new(err))
    }
}

impl From<serde_json::Error> for TrackError {
    fn from(err: serde_json::Error) -> Self {
        TrackError::Internal(Box::new(err))
    }
}

impl From<std::io::Error> for TrackError {
    fn from(err: std::io::Error) -> Self {
        TrackError::Internal(Box::new(err))
    }
}
