//! Stage template registry: the per-tenant catalog of reusable named stages.

use chrono::Utc;
use rusqlite::{OptionalExtension, params};

use crate::db::{Database, TEMPLATE_COLUMNS, row_to_template};
use crate::error::{Entity, Result, TrackError};
use crate::models::{StageTemplate, Tenant};

/// Below this similarity a name is not offered as a suggestion.
const SUGGESTION_THRESHOLD: f64 = 0.6;

fn require_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(TrackError::NameRequired);
    }
    Ok(name)
}

impl Database {
    /// `order` is display ordering only; duplicates are allowed.
    pub fn create_template(&self, tenant: &Tenant, name: &str, order: i64) -> Result<StageTemplate> {
        let name = require_name(name)?;
        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO stage_templates (tenant, name, stage_order, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![tenant.as_str(), name, order, now],
        )?;
        self.get_template(tenant, self.conn.last_insert_rowid())
    }

    pub fn get_template(&self, tenant: &Tenant, id: i64) -> Result<StageTemplate> {
        self.conn
            .query_row(
                &format!("SELECT {TEMPLATE_COLUMNS} FROM stage_templates WHERE tenant = ?1 AND id = ?2"),
                params![tenant.as_str(), id],
                row_to_template,
            )
            .optional()?
            .ok_or_else(|| TrackError::not_found(Entity::Template, id))
    }

    pub fn list_templates(&self, tenant: &Tenant) -> Result<Vec<StageTemplate>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM stage_templates WHERE tenant = ?1 ORDER BY stage_order, id"
        ))?;
        let rows = stmt.query_map([tenant.as_str()], row_to_template)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn update_template(
        &self,
        tenant: &Tenant,
        id: i64,
        name: Option<&str>,
        order: Option<i64>,
    ) -> Result<StageTemplate> {
        let current = self.get_template(tenant, id)?;
        let name = match name {
            Some(name) => require_name(name)?.to_string(),
            None => current.name,
        };
        let order = order.unwrap_or(current.order);

        self.conn.execute(
            "UPDATE stage_templates SET name = ?1, stage_order = ?2, updated_at = ?3
             WHERE tenant = ?4 AND id = ?5",
            params![name, order, Utc::now(), tenant.as_str(), id],
        )?;
        self.get_template(tenant, id)
    }

    /// Stage instances keep pointing at the deleted id; their name resolves to none.
    pub fn delete_template(&self, tenant: &Tenant, id: i64) -> Result<()> {
        let deleted = self.conn.execute(
            "DELETE FROM stage_templates WHERE tenant = ?1 AND id = ?2",
            params![tenant.as_str(), id],
        )?;
        if deleted == 0 {
            return Err(TrackError::not_found(Entity::Template, id));
        }
        Ok(())
    }

    pub fn find_template_by_name(&self, tenant: &Tenant, name: &str) -> Result<Option<StageTemplate>> {
        let template = self
            .conn
            .query_row(
                &format!(
                    "SELECT {TEMPLATE_COLUMNS} FROM stage_templates
                     WHERE tenant = ?1 AND LOWER(name) = LOWER(?2)
                     ORDER BY stage_order, id LIMIT 1"
                ),
                params![tenant.as_str(), name.trim()],
                row_to_template,
            )
            .optional()?;
        Ok(template)
    }

    /// Closest template name, for "did you mean" hints.
    pub fn suggest_template_name(&self, tenant: &Tenant, name: &str) -> Result<Option<String>> {
        let wanted = name.trim().to_lowercase();
        let best = self
            .list_templates(tenant)?
            .into_iter()
            .map(|t| {
                let score = strsim::normalized_levenshtein(&wanted, &t.name.to_lowercase());
                (t.name, score)
            })
            .filter(|(_, score)| *score >= SUGGESTION_THRESHOLD)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(best.map(|(name, _)| name))
    }
}
