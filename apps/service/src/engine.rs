use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::database::{Database, DatabaseImpl, open_pool};
use crate::monitoring::{CheckDispatcher, MonitoringExecutor, Prober};
use crate::oncall::OnCallResolver;

/// The wired-up monitoring core shared by the CLI and the HTTP server
pub struct Engine {
    pub database: Arc<dyn Database>,
    pub dispatcher: Arc<CheckDispatcher>,
    pub on_call: OnCallResolver,
}

impl Engine {
    /// Open the configured database and build real probes on top of it
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = open_pool(&config.database.path, config.database.max_connections)
            .await
            .context("Failed to initialize database")?;
        info!(path = %config.database.path.display(), "Database ready");

        let prober = MonitoringExecutor::new(&config.probes).context("Failed to build probes")?;

        Ok(Self::with_parts(Arc::new(DatabaseImpl::new_from_pool(pool)), Arc::new(prober), config))
    }

    pub fn with_parts(database: Arc<dyn Database>, prober: Arc<dyn Prober>, config: &Config) -> Self {
        Self {
            dispatcher: Arc::new(CheckDispatcher::new(database.clone(), prober, &config.dispatcher)),
            on_call: OnCallResolver::new(database.clone()),
            database,
        }
    }
}
