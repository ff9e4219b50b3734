use std::path::Path;

use async_trait::async_trait;
use sqlx::migrate::Migrator;
use tracing::{debug, info};

use crate::dbtool;
use crate::error::PipelineError;

/// Applies all pending migrations found at a directory path to a connection
/// descriptor. Implementations must be ordered and idempotent: re-running
/// against an already-migrated target is a no-op.
#[async_trait]
pub trait MigrationApplicator: Send + Sync {
    async fn apply(&self, dsn: &str, migration_dir: &str) -> Result<(), PipelineError>;
}

/// Directory-based applicator over sqlx's runtime migrator.
///
/// Migration files follow sqlx naming (`<version>_<description>.sql`);
/// applied versions are tracked inside the target, in the schema selected by
/// the descriptor's `search_path`, so each schema carries its own history.
#[derive(Debug, Clone, Default)]
pub struct SqlxMigrator;

impl SqlxMigrator {
    pub fn new() -> Self {
        Self
    }
}

async fn load_migrations(migration_dir: &str) -> Result<Migrator, PipelineError> {
    Migrator::new(Path::new(migration_dir)).await.map_err(|e| {
        PipelineError::db(format!(
            "failed to load migrations from {migration_dir}: {e}"
        ))
    })
}

#[async_trait]
impl MigrationApplicator for SqlxMigrator {
    async fn apply(&self, dsn: &str, migration_dir: &str) -> Result<(), PipelineError> {
        debug!("migrate=target dsn={}", dbtool::sanitize_dsn(dsn));

        let migrator = load_migrations(migration_dir).await?;
        info!(
            "migrate=start dir={} steps={}",
            migration_dir,
            migrator.migrations.len()
        );

        let pool = dbtool::connect(dsn).await?;
        let result = migrator
            .run(&pool)
            .await
            .map_err(|e| PipelineError::db(format!("migration execution failed: {e}")));
        pool.close().await;
        result?;

        info!("migrate=done dir={}", migration_dir);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_migrations_reads_versioned_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("20240102000000_accounts.sql"),
            "CREATE TABLE accounts (id BIGINT PRIMARY KEY);",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("20240101000000_init.sql"),
            "CREATE TABLE init_marker (id BIGINT PRIMARY KEY);",
        )
        .unwrap();

        let migrator = load_migrations(dir.path().to_str().unwrap()).await.unwrap();
        let versions: Vec<i64> = migrator.migrations.iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![20240101000000, 20240102000000]);
    }

    #[tokio::test]
    async fn load_migrations_reports_missing_directory() {
        let err = load_migrations("./does/not/exist").await.unwrap_err();
        assert!(matches!(err, PipelineError::Db { .. }));
        assert!(err.to_string().contains("./does/not/exist"));
    }
}
