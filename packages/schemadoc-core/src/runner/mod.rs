pub mod docker;
pub mod embedded;

pub use docker::PostgresDocker;
pub use embedded::PostgresEmbedded;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::{Config, SchemaJob};
use crate::dbtool::sanitize_dsn;
use crate::error::PipelineError;
use crate::migrator::MigrationApplicator;
use crate::tbls::{DocGenerator, ToolStatus};

/// Capability contract over a disposable database instance.
///
/// The variants differ only in how they obtain a live process (container vs
/// embedded engine); database/schema creation and DSN shaping behave
/// identically above that line.
#[async_trait]
pub trait DbBackend: Send + Sync {
    /// Start the instance and block until it accepts connections, probing
    /// with a bounded connect-and-ping loop. Fails with `BackendUnavailable`
    /// when the wait ceiling is exceeded.
    async fn init(&mut self) -> Result<(), PipelineError>;

    /// Create the configured target database when its name differs from the
    /// administrative default.
    async fn create_db(&self) -> Result<(), PipelineError>;

    /// Ensure the currently selected schema exists.
    async fn create_schema(&self) -> Result<(), PipelineError>;

    /// Ensure every schema in the configured list exists.
    async fn create_schemas(&self) -> Result<(), PipelineError>;

    /// Descriptor for the currently selected database name and schema.
    fn dsn(&self) -> String;

    /// Derive a copy scoped to another schema. The receiver is unchanged and
    /// the running instance is shared between the copies.
    fn with_schema(&self, schema: &str) -> Self
    where
        Self: Sized;

    /// Release the instance. Called exactly once per successful `init`; the
    /// `Runner` never calls it without one.
    async fn stop(&self) -> Result<(), PipelineError>;
}

/// Pipeline orchestrator: spin up, migrate, document, tear down.
pub struct Runner<B, M, D> {
    cfg: Config,
    backend: B,
    migrator: M,
    docgen: D,
}

impl<B, M, D> Runner<B, M, D>
where
    B: DbBackend + Clone + 'static,
    M: MigrationApplicator + 'static,
    D: DocGenerator + 'static,
{
    pub fn new(cfg: Config, backend: B, migrator: M, docgen: D) -> Self {
        Self {
            cfg,
            backend,
            migrator,
            docgen,
        }
    }

    /// Run the full pipeline.
    ///
    /// Job pairing is validated before anything external is touched. Once
    /// `init` has succeeded the instance is stopped on every exit path,
    /// including a panic inside the pipeline body: the body runs on its own
    /// task, and a panicked join is converted to an error only after `stop`
    /// has run.
    pub async fn run(self) -> Result<(), PipelineError> {
        let Self {
            cfg,
            mut backend,
            migrator,
            docgen,
        } = self;

        let jobs = cfg.schema_jobs()?;

        match docgen.preflight().await? {
            ToolStatus::Available => debug!("tool=available"),
            ToolStatus::Installed => info!("tool=installed"),
            ToolStatus::Unavailable { reason } => {
                return Err(PipelineError::ToolUnavailable { reason })
            }
        }

        backend.init().await?;
        info!("backend=initialized dsn={}", sanitize_dsn(&backend.dsn()));

        let body = tokio::spawn(pipeline_body(backend.clone(), migrator, docgen, jobs));
        let body_result = match body.await {
            Ok(result) => result,
            Err(join_err) if join_err.is_panic() => Err(PipelineError::internal(
                "pipeline task panicked during execution".to_string(),
            )),
            Err(_) => Err(PipelineError::internal(
                "pipeline task was aborted before completion".to_string(),
            )),
        };

        let stop_result = backend.stop().await;
        match (body_result, stop_result) {
            (Ok(()), Ok(())) => {
                info!("pipeline=done");
                Ok(())
            }
            (Ok(()), Err(stop_err)) => Err(stop_err),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(stop_err)) => {
                // Cleanup must never mask the error that caused it to run.
                warn!(error = %stop_err, "backend stop failed after pipeline error");
                Err(e)
            }
        }
    }
}

async fn pipeline_body<B, M, D>(
    backend: B,
    migrator: M,
    docgen: D,
    jobs: Vec<SchemaJob>,
) -> Result<(), PipelineError>
where
    B: DbBackend,
    M: MigrationApplicator,
    D: DocGenerator,
{
    backend.create_db().await?;
    backend.create_schemas().await?;

    for job in &jobs {
        let dsn = backend.with_schema(&job.schema).dsn();
        info!(
            "migrate=schema schema={} dir={}",
            job.schema, job.migration_dir
        );
        if let Err(e) = migrator.apply(&dsn, &job.migration_dir).await {
            return Err(PipelineError::MigrationFailed {
                schema: job.schema.clone(),
                reason: e.to_string(),
            });
        }
    }

    for job in &jobs {
        let dsn = backend.with_schema(&job.schema).dsn();
        info!(
            "document=schema schema={} config={}",
            job.schema, job.tbls_config_file
        );
        if let Err(e) = docgen.generate(&dsn, &job.tbls_config_file).await {
            return Err(PipelineError::DocumentationFailed {
                schema: job.schema.clone(),
                reason: e.to_string(),
            });
        }
    }

    Ok(())
}
