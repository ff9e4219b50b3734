use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::service::{HostConfig, PortBinding, PortMap};
use bollard::Docker;
use futures_util::StreamExt;
use tracing::{debug, info, warn};

use crate::config::{Config, Database, ADMIN_DATABASE, DEFAULT_SCHEMA};
use crate::dbtool::{self, READY_MAX_ATTEMPTS, READY_RETRY_INTERVAL_MS};
use crate::error::PipelineError;
use crate::runner::DbBackend;

const POSTGRES_IMAGE: &str = "postgres:16";
const POSTGRES_PORT: &str = "5432/tcp";

/// Containerized PostgreSQL over the Docker Engine API.
///
/// The live container handle sits behind an `Arc` so `with_schema` copies
/// share one instance and clone only the configuration portion.
#[derive(Clone)]
pub struct PostgresDocker {
    cfg: Config,
    admin: Database,
    container: Option<Arc<ContainerHandle>>,
}

struct ContainerHandle {
    docker: Docker,
    id: String,
}

impl PostgresDocker {
    pub fn new(cfg: Config) -> Self {
        let admin = cfg
            .database
            .with_db_name(ADMIN_DATABASE)
            .with_schema(DEFAULT_SCHEMA);
        Self {
            cfg,
            admin,
            container: None,
        }
    }

    fn handle(&self) -> Result<&ContainerHandle, PipelineError> {
        self.container
            .as_deref()
            .ok_or_else(|| PipelineError::internal("backend used before init".to_string()))
    }
}

fn container_env(admin: &Database) -> Vec<String> {
    vec![
        format!("POSTGRES_USER={}", admin.username),
        format!("POSTGRES_PASSWORD={}", admin.password),
        format!("POSTGRES_DB={}", admin.name),
    ]
}

fn host_port_from_ports(ports: &PortMap) -> Option<u16> {
    ports
        .get(POSTGRES_PORT)?
        .as_ref()?
        .iter()
        .find_map(|binding| binding.host_port.as_deref()?.parse().ok())
}

async fn pull_image(docker: &Docker, image: &str) -> Result<(), PipelineError> {
    info!("image=pull reference={}", image);
    let options = CreateImageOptions {
        from_image: image.to_string(),
        ..Default::default()
    };

    let mut stream = docker.create_image(Some(options), None, None);
    while let Some(item) = stream.next().await {
        match item {
            Ok(progress) => {
                if let Some(status) = progress.status {
                    debug!("image_pull status={}", status);
                }
            }
            Err(e) => {
                return Err(PipelineError::backend_unavailable(format!(
                    "pull {image}: {e}"
                )))
            }
        }
    }
    Ok(())
}

async fn create_container(
    docker: &Docker,
    name: &str,
    admin: &Database,
) -> Result<String, PipelineError> {
    let mut exposed_ports = HashMap::new();
    exposed_ports.insert(POSTGRES_PORT.to_string(), HashMap::new());

    let mut port_bindings: PortMap = HashMap::new();
    port_bindings.insert(
        POSTGRES_PORT.to_string(),
        Some(vec![PortBinding {
            host_ip: None,
            // Left empty so the engine binds an ephemeral host port.
            host_port: None,
        }]),
    );

    let config = ContainerConfig {
        image: Some(POSTGRES_IMAGE.to_string()),
        env: Some(container_env(admin)),
        exposed_ports: Some(exposed_ports),
        host_config: Some(HostConfig {
            port_bindings: Some(port_bindings),
            ..Default::default()
        }),
        ..Default::default()
    };

    let created = docker
        .create_container(
            Some(CreateContainerOptions {
                name: name.to_string(),
                platform: None,
            }),
            config,
        )
        .await
        .map_err(|e| PipelineError::backend_unavailable(format!("create container: {e}")))?;

    Ok(created.id)
}

async fn remove_container(docker: &Docker, id: &str) {
    let options = RemoveContainerOptions {
        force: true,
        v: true,
        ..Default::default()
    };
    if let Err(e) = docker.remove_container(id, Some(options)).await {
        warn!("container_remove=failed id={} err={}", id, e);
    }
}

/// Start the created container, discover the bound host port, and probe
/// until the instance accepts connections. Failures here remove the
/// container before the error returns; a failed init never gets a stop call.
async fn start_and_probe(
    docker: &Docker,
    id: &str,
    admin: &Database,
) -> Result<Database, PipelineError> {
    match try_start(docker, id, admin).await {
        Ok(admin) => Ok(admin),
        Err(e) => {
            remove_container(docker, id).await;
            Err(e)
        }
    }
}

async fn try_start(docker: &Docker, id: &str, admin: &Database) -> Result<Database, PipelineError> {
    docker
        .start_container(id, None::<StartContainerOptions<String>>)
        .await
        .map_err(|e| PipelineError::backend_unavailable(format!("start container: {e}")))?;

    let inspect = docker
        .inspect_container(id, None)
        .await
        .map_err(|e| PipelineError::backend_unavailable(format!("inspect container: {e}")))?;
    let ports = inspect
        .network_settings
        .and_then(|settings| settings.ports)
        .unwrap_or_default();
    let host_port = host_port_from_ports(&ports).ok_or_else(|| {
        PipelineError::backend_unavailable(format!("no host port bound for {POSTGRES_PORT}"))
    })?;

    let admin = admin.with_port(host_port);
    info!("container=started id={} host_port={}", id, host_port);

    let pool = dbtool::wait_until_ready(&admin.dsn(), READY_MAX_ATTEMPTS, READY_RETRY_INTERVAL_MS)
        .await
        .map_err(|e| PipelineError::backend_unavailable(e.to_string()))?;
    pool.close().await;
    Ok(admin)
}

#[async_trait]
impl DbBackend for PostgresDocker {
    async fn init(&mut self) -> Result<(), PipelineError> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| {
            PipelineError::backend_unavailable(format!("docker engine unreachable: {e}"))
        })?;
        docker.ping().await.map_err(|e| {
            PipelineError::backend_unavailable(format!("docker engine ping failed: {e}"))
        })?;

        pull_image(&docker, POSTGRES_IMAGE).await?;

        let name = format!("schemadoc-pg-{}", std::process::id());
        let id = create_container(&docker, &name, &self.admin).await?;
        let admin = start_and_probe(&docker, &id, &self.admin).await?;

        self.admin = admin;
        self.container = Some(Arc::new(ContainerHandle { docker, id }));
        Ok(())
    }

    async fn create_db(&self) -> Result<(), PipelineError> {
        self.handle()?;
        dbtool::ensure_database(&self.admin, &self.cfg.database.name).await
    }

    async fn create_schema(&self) -> Result<(), PipelineError> {
        self.handle()?;
        if self.cfg.database.schema == DEFAULT_SCHEMA {
            debug!("schema=default create_skipped=true");
            return Ok(());
        }
        let target = self.admin.with_db_name(&self.cfg.database.name);
        dbtool::ensure_schemas(&target, std::slice::from_ref(&self.cfg.database.schema)).await
    }

    async fn create_schemas(&self) -> Result<(), PipelineError> {
        self.handle()?;
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
        let handle = self.handle()?;

        if let Err(e) = handle
            .docker
            .stop_container(&handle.id, Some(StopContainerOptions { t: 10 }))
            .await
        {
            warn!("container_stop=failed id={} err={}", handle.id, e);
        }

        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        handle
            .docker
            .remove_container(&handle.id, Some(options))
            .await
            .map_err(|e| {
                PipelineError::cleanup_failed(format!("remove container {}: {e}", handle.id))
            })?;
        info!("container=removed id={}", handle.id);
        Ok(())
    }
}
