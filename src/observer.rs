use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tracing::info;

use crate::models::{StageStatus, Tenant};

/// A committed change to an application's stage history.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StageEvent {
    Appended {
        tenant: Tenant,
        application_id: i64,
        stage_id: i64,
        template_id: i64,
        order: i64,
    },
    /// The previous current stage was auto-completed by an append.
    Closed {
        tenant: Tenant,
        application_id: i64,
        stage_id: i64,
        from: StageStatus,
    },
    StatusChanged {
        tenant: Tenant,
        application_id: i64,
        stage_id: i64,
        from: StageStatus,
        to: StageStatus,
    },
    Completed {
        tenant: Tenant,
        application_id: i64,
        stage_id: i64,
        from: StageStatus,
    },
    Deleted {
        tenant: Tenant,
        application_id: i64,
        stage_id: i64,
        was_current: bool,
        current_stage_id: Option<i64>,
    },
}

pub trait StageObserver: Send + Sync {
    fn record(&self, event: &StageEvent);
}

/// Writes every event to the `tracing` pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl StageObserver for TracingObserver {
    fn record(&self, event: &StageEvent) {
        match event {
            StageEvent::Appended {
                tenant,
                application_id,
                stage_id,
                template_id,
                order,
            } => info!(%tenant, application_id, stage_id, template_id, order, "stage appended"),
            StageEvent::Closed {
                tenant,
                application_id,
                stage_id,
                from,
            } => info!(%tenant, application_id, stage_id, %from, "previous stage closed"),
            StageEvent::StatusChanged {
                tenant,
                application_id,
                stage_id,
                from,
                to,
            } => info!(%tenant, application_id, stage_id, %from, %to, "stage status changed"),
            StageEvent::Completed {
                tenant,
                application_id,
                stage_id,
                from,
            } => info!(%tenant, application_id, stage_id, %from, "stage completed"),
            StageEvent::Deleted {
                tenant,
                application_id,
                stage_id,
                was_current,
                current_stage_id,
            } => info!(
                %tenant,
                application_id,
                stage_id,
                was_current,
                current_stage_id = ?current_stage_id,
                "stage deleted"
            ),
        }
    }
}

/// Keeps events in memory, in the order they were recorded.
#[derive(Debug, Default)]
pub struct MemoryObserver {
    events: Mutex<Vec<StageEvent>>,
}

impl MemoryObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StageEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl StageObserver for MemoryObserver {
    fn record(&self, event: &StageEvent) {
        // keeps recording after a panic elsewhere poisoned the lock
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}
