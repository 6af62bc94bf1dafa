use std::path::PathBuf;

use anyhow::{Result, bail};
use tracing_subscriber::EnvFilter;

use crate::db::Database;
use crate::models::Tenant;

const DEFAULT_TENANT: &str = "default";

/// Resolved runtime settings for one invocation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub db_path: PathBuf,
    pub tenant: Tenant,
}

impl Settings {
    /// Flag/env values win; otherwise the XDG data dir and `$USER`.
    pub fn resolve(db: Option<PathBuf>, user: Option<String>) -> Result<Self> {
        let db_path = db.unwrap_or_else(Database::default_path);
        let user = match user {
            Some(user) => user,
            None => std::env::var("USER").unwrap_or_else(|_| DEFAULT_TENANT.to_string()),
        };
        let user = user.trim();
        if user.is_empty() {
            bail!("user must not be blank");
        }
        Ok(Self {
            db_path,
            tenant: Tenant::new(user),
        })
    }
}

/// Installs the stderr log subscriber. `RUST_LOG` overrides `verbosity`.
pub fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("jobtrail={level}")));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
