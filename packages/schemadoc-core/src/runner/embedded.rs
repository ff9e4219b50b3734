use std::sync::Arc;

use async_trait::async_trait;
use postgresql_embedded::{PostgreSQL, Settings, VersionReq};
use tracing::{debug, info, warn};

use crate::config::{Config, Database, ADMIN_DATABASE, DEFAULT_SCHEMA};
use crate::dbtool::{self, READY_MAX_ATTEMPTS, READY_RETRY_INTERVAL_MS};
use crate::error::PipelineError;
use crate::runner::DbBackend;

const POSTGRES_VERSION: &str = "=16.4.0";

/// Embedded PostgreSQL running as a child process of this program.
///
/// No external daemon is involved; the server binaries are downloaded and
/// cached on first use. Data lives in a temporary directory that is removed
/// when the engine stops.
#[derive(Clone)]
pub struct PostgresEmbedded {
    cfg: Config,
    admin: Database,
    engine: Option<Arc<PostgreSQL>>,
}

impl PostgresEmbedded {
    pub fn new(cfg: Config) -> Self {
        let admin = cfg
            .database
            .with_db_name(ADMIN_DATABASE)
            .with_schema(DEFAULT_SCHEMA);
        Self {
            cfg,
            admin,
            engine: None,
        }
    }

    fn engine(&self) -> Result<&PostgreSQL, PipelineError> {
        self.engine
            .as_deref()
            .ok_or_else(|| PipelineError::internal("backend used before init".to_string()))
    }
}

fn engine_settings(admin: &Database) -> Result<Settings, PipelineError> {
    let version = VersionReq::parse(POSTGRES_VERSION).map_err(|e| {
        PipelineError::internal(format!("version requirement {POSTGRES_VERSION}: {e}"))
    })?;
    Ok(Settings {
        version,
        username: admin.username.clone(),
        password: admin.password.clone(),
        port: admin.port,
        temporary: true,
        ..Default::default()
    })
}

#[async_trait]
impl DbBackend for PostgresEmbedded {
    async fn init(&mut self) -> Result<(), PipelineError> {
        let settings = engine_settings(&self.admin)?;
        let mut engine = PostgreSQL::new(settings);

        engine.setup().await.map_err(|e| {
            PipelineError::backend_unavailable(format!("embedded server setup: {e}"))
        })?;
        engine.start().await.map_err(|e| {
            PipelineError::backend_unavailable(format!("embedded server start: {e}"))
        })?;

        // The engine may have settled on a different port than requested.
        let admin = self.admin.with_port(engine.settings().port);
        info!("embedded=started port={}", admin.port);

        let probe =
            dbtool::wait_until_ready(&admin.dsn(), READY_MAX_ATTEMPTS, READY_RETRY_INTERVAL_MS)
                .await;
        match probe {
            Ok(pool) => {
                pool.close().await;
                self.admin = admin;
                self.engine = Some(Arc::new(engine));
                Ok(())
            }
            Err(e) => {
                // A failed init never gets a stop call, so the child process
                // must not outlive this error.
                if let Err(stop_err) = engine.stop().await {
                    warn!("embedded_stop=failed err={}", stop_err);
                }
                Err(PipelineError::backend_unavailable(e.to_string()))
            }
        }
    }

    async fn create_db(&self) -> Result<(), PipelineError> {
        self.engine()?;
        dbtool::ensure_database(&self.admin, &self.cfg.database.name).await
    }

    async fn create_schema(&self) -> Result<(), PipelineError> {
        self.engine()?;
        if self.cfg.database.schema == DEFAULT_SCHEMA {
            debug!("schema=default create_skipped=true");
            return Ok(());
        }
        let target = self.admin.with_db_name(&self.cfg.database.name);
        dbtool::ensure_schemas(&target, std::slice::from_ref(&self.cfg.database.schema)).await
    }

    async fn create_schemas(&self) -> Result<(), PipelineError> {
        self.engine()?;
        let target = self.admin.with_db_name(&self.cfg.database.name);
        dbtool::ensure_schemas(&target, &self.cfg.schemas).await
    }

    fn dsn(&self) -> String {
        self.admin
            .with_db_name(&self.cfg.database.name)
            .with_schema(&self.cfg.database.schema)
            .dsn()
    }

    fn with_schema(&self, schema: &str) -> Self {
        let mut copy = self.clone();
        copy.cfg.database = copy.cfg.database.with_schema(schema);
        copy
    }

    async fn stop(&self) -> Result<(), PipelineError> {
        let engine = self.engine()?;
        engine
            .stop()
            .await
            .map_err(|e| PipelineError::cleanup_failed(format!("stop embedded server: {e}")))?;
        info!("embedded=stopped");
        Ok(())
    }
}
