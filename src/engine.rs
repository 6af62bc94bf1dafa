//! Stage lifecycle: appending, updating, completing and deleting the stage
//! instances of an application, and keeping its current-stage pointer valid.
//!
//! Every operation that reads and then writes runs inside one immediate write
//! transaction, so the close-previous/create/repoint sequence of an append and the
//! delete/recompute sequence of a delete commit together or not at all. Observer
//! events and note attachment happen only after the commit.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use tracing::{debug, warn};

use crate::applications::{count_stages, fetch_application, fetch_stage};
use crate::collaborators::CommentStore;
use crate::db::{Database, STAGE_SELECT, row_to_stage};
use crate::error::{Entity, Result, TrackError};
use crate::models::{Application, StageInstance, StageStatus, Tenant};
use crate::observer::{StageEvent, StageObserver, TracingObserver};

static TRACING_OBSERVER: TracingObserver = TracingObserver;

pub struct StageEngine<'a> {
    db: &'a Database,
    comments: &'a dyn CommentStore,
    observer: &'a dyn StageObserver,
}

impl<'a> StageEngine<'a> {
    /// Engine writing notes to `db` and reporting events through `tracing`.
    pub fn new(db: &'a Database) -> Self {
        Self {
            db,
            comments: db,
            observer: &TRACING_OBSERVER,
        }
    }

    pub fn with_observer(mut self, observer: &'a dyn StageObserver) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_comment_store(mut self, comments: &'a dyn CommentStore) -> Self {
        self.comments = comments;
        self
    }

    /// Appends a new active stage built from `template_id` and makes it current.
    ///
    /// The previous current stage is completed first unless it already is. A note,
    /// if given, is attached to the new stage after commit; failing to attach it
    /// does not fail the append.
    pub fn append_stage(
        &self,
        tenant: &Tenant,
        application_id: i64,
        template_id: i64,
        note: Option<&str>,
    ) -> Result<StageInstance> {
        let now = Utc::now();
        let tx = self.db.write_tx()?;

        let application = fetch_application(&tx, tenant, application_id)?;
        let template = self.db.get_template(tenant, template_id)?;
        // count, not max(order)+1: deletions leave no gaps in new orders
        let order = count_stages(&tx, application.id)?;

        let mut closed = None;
        if let Some(current_id) = application.current_stage_id {
            match fetch_stage(&tx, current_id)? {
                Some(current) if current.application_id == application.id => {
                    if current.status != StageStatus::Completed {
                        tx.execute(
                            "UPDATE application_stages SET status = ?1, completed_at = ?2 WHERE id = ?3",
                            params![StageStatus::Completed, now, current.id],
                        )?;
                        closed = Some((current.id, current.status));
                    }
                }
                _ => warn!(
                    %tenant,
                    application_id,
                    stage_id = current_id,
                    "current stage pointer is dangling; replacing it"
                ),
            }
        }

        tx.execute(
            "INSERT INTO application_stages
                (application_id, template_id, status, stage_order, started_at, completed_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?5)",
            params![application.id, template.id, StageStatus::Active, order, now],
        )?;
        let stage_id = tx.last_insert_rowid();
        set_current_stage(&tx, &application, Some(stage_id), now)?;
        let appended = load_stage(&tx, stage_id)?;
        tx.commit()?;

        if let Some((closed_id, from)) = closed {
            self.observer.record(&StageEvent::Closed {
                tenant: tenant.clone(),
                application_id,
                stage_id: closed_id,
                from,
            });
        }
        self.observer.record(&StageEvent::Appended {
            tenant: tenant.clone(),
            application_id,
            stage_id,
            template_id: template.id,
            order,
        });

        if let Some(note) = note.map(str::trim).filter(|n| !n.is_empty()) {
            if let Err(e) = self
                .comments
                .create_comment(tenant, application_id, Some(stage_id), note)
            {
                warn!(%tenant, application_id, stage_id, error = %e, "failed to attach stage note");
            }
        }

        Ok(appended)
    }

    /// Sets a stage's status. The current-stage pointer is never moved here.
    ///
    /// `completed_at`: an explicit value wins; otherwise `completed` stamps now if
    /// unset, `pending`/`active` clear it, and `skipped`/`cancelled` keep whatever
    /// is already there.
    pub fn update_stage_status(
        &self,
        tenant: &Tenant,
        application_id: i64,
        stage_id: i64,
        status: &str,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<StageInstance> {
        let tx = self.db.write_tx()?;
        let application = fetch_application(&tx, tenant, application_id)?;
        let stage = owned_stage(&tx, &application, stage_id)?;
        let status: StageStatus = status.parse()?;

        let completed_at = match completed_at {
            Some(at) => Some(at),
            None if status == StageStatus::Completed => stage.completed_at.or(Some(Utc::now())),
            None if status.is_open() => None,
            None => stage.completed_at,
        };

        tx.execute(
            "UPDATE application_stages SET status = ?1, completed_at = ?2 WHERE id = ?3",
            params![status, completed_at, stage.id],
        )?;
        let updated = load_stage(&tx, stage.id)?;
        tx.commit()?;

        if stage.status != status {
            self.observer.record(&StageEvent::StatusChanged {
                tenant: tenant.clone(),
                application_id,
                stage_id,
                from: stage.status,
                to: status,
            });
        }
        Ok(updated)
    }

    /// Marks a stage completed.
    ///
    /// An explicit `completed_at` always wins. Without one, a stage that is already
    /// completed keeps its time, so repeating the call changes nothing.
    pub fn complete_stage(
        &self,
        tenant: &Tenant,
        application_id: i64,
        stage_id: i64,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<StageInstance> {
        let tx = self.db.write_tx()?;
        let application = fetch_application(&tx, tenant, application_id)?;
        let stage = owned_stage(&tx, &application, stage_id)?;

        let already = stage
            .completed_at
            .filter(|_| stage.status == StageStatus::Completed);
        let completed_at = completed_at.or(already).unwrap_or_else(Utc::now);

        tx.execute(
            "UPDATE application_stages SET status = ?1, completed_at = ?2 WHERE id = ?3",
            params![StageStatus::Completed, completed_at, stage.id],
        )?;
        let completed = load_stage(&tx, stage.id)?;
        tx.commit()?;

        if stage.status != StageStatus::Completed {
            self.observer.record(&StageEvent::Completed {
                tenant: tenant.clone(),
                application_id,
                stage_id,
                from: stage.status,
            });
        }
        Ok(completed)
    }

    /// Hard-deletes a stage. If it was current, the pointer moves to the most
    /// recently created remaining stage that is active or completed, or to none.
    pub fn delete_stage(&self, tenant: &Tenant, application_id: i64, stage_id: i64) -> Result<()> {
        let now = Utc::now();
        let tx = self.db.write_tx()?;
        let application = fetch_application(&tx, tenant, application_id)?;
        let stage = owned_stage(&tx, &application, stage_id)?;
        let was_current = application.current_stage_id == Some(stage.id);

        tx.execute("DELETE FROM application_stages WHERE id = ?1", [stage.id])?;

        let mut current_stage_id = application.current_stage_id;
        if was_current {
            let remaining = stages_in_creation_order(&tx, application.id)?;
            current_stage_id = remaining
                .iter()
                .rev()
                .find(|s| s.status.marks_progress())
                .map(|s| s.id);
            debug!(application_id, ?current_stage_id, "recomputed current stage");
            set_current_stage(&tx, &application, current_stage_id, now)?;
        }
        tx.commit()?;

        self.observer.record(&StageEvent::Deleted {
            tenant: tenant.clone(),
            application_id,
            stage_id,
            was_current,
            current_stage_id,
        });
        Ok(())
    }

    /// Stages of an application by `order`, ties broken by creation.
    pub fn list_stages(&self, tenant: &Tenant, application_id: i64) -> Result<Vec<StageInstance>> {
        let application = fetch_application(&self.db.conn, tenant, application_id)?;
        let mut stmt = self.db.conn.prepare(&format!(
            "{STAGE_SELECT} WHERE s.application_id = ?1 ORDER BY s.stage_order, s.id"
        ))?;
        let rows = stmt.query_map([application.id], row_to_stage)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_stage(&self, tenant: &Tenant, application_id: i64, stage_id: i64) -> Result<StageInstance> {
        let application = fetch_application(&self.db.conn, tenant, application_id)?;
        owned_stage(&self.db.conn, &application, stage_id)
    }
}

/// Reads a stage back inside the writing transaction, so the caller gets the
/// committed row even if another worker deletes it right after.
fn load_stage(conn: &Connection, stage_id: i64) -> Result<StageInstance> {
    fetch_stage(conn, stage_id)?.ok_or_else(|| TrackError::not_found(Entity::Stage, stage_id))
}

fn owned_stage(conn: &Connection, application: &Application, stage_id: i64) -> Result<StageInstance> {
    let stage = fetch_stage(conn, stage_id)?.ok_or_else(|| TrackError::not_found(Entity::Stage, stage_id))?;
    if stage.application_id != application.id {
        return Err(TrackError::ApplicationStageNotFound {
            application_id: application.id,
            stage_id,
        });
    }
    Ok(stage)
}

fn stages_in_creation_order(conn: &Connection, application_id: i64) -> Result<Vec<StageInstance>> {
    let mut stmt = conn.prepare(&format!(
        "{STAGE_SELECT} WHERE s.application_id = ?1 ORDER BY s.id"
    ))?;
    let rows = stmt.query_map([application_id], row_to_stage)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn set_current_stage(
    conn: &Connection,
    application: &Application,
    stage_id: Option<i64>,
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "UPDATE applications SET current_stage_id = ?1, updated_at = ?2 WHERE id = ?3",
        params![stage_id, now, application.id],
    )?;
    Ok(())
}
