/// Database abstraction layer
///
/// The monitoring core only talks to storage through the [`Database`]
/// trait; the libsql implementation lives in [`repository`].

pub mod migrations;
pub mod models;
pub mod repository;

pub use repository::{Database, DatabaseImpl};

use anyhow::{Context, Result};
use std::path::Path;

use crate::pool::{LibsqlManager, LibsqlPool};

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}

/// Open (or create) the local database file, build a pool and migrate it
pub async fn open_pool(path: impl AsRef<Path>, max_connections: usize) -> Result<LibsqlPool> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
    }

    let db = libsql::Builder::new_local(path)
        .build()
        .await
        .with_context(|| format!("Failed to open database {}", path.display()))?;

    let pool: LibsqlPool = deadpool::managed::Pool::builder(LibsqlManager::new(db))
        .max_size(max_connections.max(1))
        .build()?;

    let conn = pool.get().await?;
    initialize_database(&*conn).await?;

    Ok(pool)
}
