use super::engine::{ContainerEngine, ContainerSpec, EngineError, RemoveOptions};
use super::types::{Config, DockerClient, DockerError, DockerOutcome, DockerResult};
use async_trait::async_trait;
use bollard::{
    Docker,
    container::{
        Config as ContainerConfig, CreateContainerOptions, LogOutput, LogsOptions,
        RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
    },
    errors::Error as BollardError,
    image::CreateImageOptions,
    models::{HostConfig, RestartPolicy, RestartPolicyNameEnum},
};
use futures_util::stream::StreamExt;
use std::{collections::HashMap, future::Future, pin::pin, time::Duration};
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

pub const DEFAULT_PULL_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_LOG_TIMEOUT: Duration = Duration::from_secs(30);

impl<E: ContainerEngine> DockerClient<E> {
    pub fn new(engine: E) -> Self {
        DockerClient {
            engine,
            pull_timeout: DEFAULT_PULL_TIMEOUT,
            log_timeout: DEFAULT_LOG_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, pull_timeout: Duration, log_timeout: Duration) -> Self {
        self.pull_timeout = pull_timeout;
        self.log_timeout = log_timeout;
        self
    }

    /// Pull, create, start and dump the logs of the container described by
    /// `config`.
    ///
    /// Each step short-circuits on failure. A container that was created but
    /// failed to start, or whose logs could not be read, is force-removed
    /// before the error is returned. Dropping this future while the engine is
    /// creating the container can still leave one behind.
    pub async fn run(&self, config: &Config) -> DockerResult {
        config.validate()?;
        let spec = ContainerSpec::from(config);

        info!(image = %config.image, "pulling image");
        bounded(self.pull_timeout, self.engine.pull_image(&config.image))
            .await
            .map_err(|source| {
                error!(image = %config.image, error = %source, "image pull failed");
                DockerError::Pull {
                    image: config.image.clone(),
                    source,
                }
            })?;

        let container_id = self
            .engine
            .create_container(&spec)
            .await
            .map_err(|source| {
                error!(name = %config.name, error = %source, "container create failed");
                DockerError::Create {
                    name: config.name.clone(),
                    source,
                }
            })?;
        info!(name = %config.name, container_id = %container_id, "container created");

        if let Err(source) = self.engine.start_container(&container_id).await {
            error!(container_id = %container_id, error = %source, "container start failed");
            self.discard(&container_id).await;
            return Err(DockerError::Start {
                container_id,
                source,
            });
        }
        info!(container_id = %container_id, "container started");

        if let Err(source) = bounded(self.log_timeout, self.engine.copy_logs(&container_id)).await {
            error!(container_id = %container_id, error = %source, "log copy failed");
            self.discard(&container_id).await;
            return Err(DockerError::Logs {
                container_id,
                source,
            });
        }

        Ok(DockerOutcome::started(container_id))
    }

    /// Gracefully stops the container, then removes it together with its
    /// volumes. Remove is not attempted when stop fails.
    pub async fn stop(&self, container_id: &str) -> DockerResult {
        if container_id.is_empty() {
            return Err(DockerError::InvalidConfig(
                "container id must not be empty".to_string(),
            ));
        }

        info!(container_id, "stopping container");
        self.engine
            .stop_container(container_id)
            .await
            .map_err(|source| DockerError::Stop {
                container_id: container_id.to_string(),
                source,
            })?;

        self.engine
            .remove_container(container_id, RemoveOptions::TEARDOWN)
            .await
            .map_err(|source| DockerError::Remove {
                container_id: container_id.to_string(),
                source,
            })?;
        info!(container_id, "container stopped and removed");

        Ok(DockerOutcome::stopped())
    }

    async fn discard(&self, container_id: &str) {
        if let Err(err) = self
            .engine
            .remove_container(container_id, RemoveOptions::DISCARD)
            .await
        {
            warn!(container_id, error = %err, "could not remove container left by failed run");
        }
    }
}

async fn bounded<T>(
    limit: Duration,
    operation: impl Future<Output = Result<T, EngineError>>,
) -> Result<T, EngineError> {
    timeout(limit, operation)
        .await
        .unwrap_or_else(|_| Err(EngineError::Timeout(limit)))
}

impl From<BollardError> for EngineError {
    fn from(err: BollardError) -> Self {
        match err {
            BollardError::DockerResponseServerError {
                status_code: 404,
                message,
            } => EngineError::NotFound(message),
            BollardError::DockerResponseServerError {
                status_code: 409,
                message,
            } => EngineError::Conflict(message),
            BollardError::DockerResponseServerError { message, .. } => {
                EngineError::Rejected(message)
            }
            BollardError::DockerStreamError { error } => EngineError::Rejected(error),
            other => EngineError::Transport(other.to_string()),
        }
    }
}

/// [`ContainerEngine`] backed by the local Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerEngine {
    client: Docker,
}

impl DockerEngine {
    /// Connects using `DOCKER_HOST` or the platform's default socket.
    pub fn connect() -> Result<Self, EngineError> {
        let client = Docker::connect_with_local_defaults()?;
        Ok(DockerEngine { client })
    }

    fn restart_policy(policy: &str) -> Result<Option<RestartPolicy>, EngineError> {
        if policy.is_empty() {
            return Ok(None);
        }
        // bollard's typed enum has no slot for arbitrary names, so unknown
        // policies fail here instead of at the daemon.
        let name: RestartPolicyNameEnum = policy
            .parse()
            .map_err(|_| EngineError::Rejected(format!("unsupported restart policy {policy:?}")))?;

        Ok(Some(RestartPolicy {
            name: Some(name),
            maximum_retry_count: None,
        }))
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn pull_image(&self, image: &str) -> Result<(), EngineError> {
        let mut stream = pin!(self.client.create_image(
            Some(CreateImageOptions {
                from_image: image,
                ..Default::default()
            }),
            None,
            None,
        ));

        while let Some(msg) = stream.next().await {
            let info = msg?;
            if let Some(status) = info.status {
                debug!(
                    image,
                    status = %status,
                    progress = info.progress.as_deref().unwrap_or_default(),
                    "pull"
                );
            }
        }

        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        let host_config = HostConfig {
            restart_policy: Self::restart_policy(&spec.restart_policy)?,
            nano_cpus: Some(spec.nano_cpus),
            memory: Some(spec.memory),
            publish_all_ports: Some(spec.publish_all_ports),
            ..Default::default()
        };

        let container_config = ContainerConfig {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            exposed_ports: Some(
                spec.exposed_ports
                    .iter()
                    .map(|port| (port.clone(), HashMap::new()))
                    .collect(),
            ),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = (!spec.name.is_empty()).then(|| CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        });

        let response = self
            .client
            .create_container(options, container_config)
            .await?;
        for warning in &response.warnings {
            warn!(container_id = %response.id, warning = %warning, "engine warning on create");
        }

        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.client
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn copy_logs(&self, id: &str) -> Result<(), EngineError> {
        let mut stream = pin!(self.client.logs(
            id,
            Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                tail: "all".to_string(),
                ..Default::default()
            }),
        ));

        let mut stdout = tokio::io::stdout();
        let mut stderr = tokio::io::stderr();
        while let Some(frame) = stream.next().await {
            let written = match frame? {
                LogOutput::StdErr { message } => stderr.write_all(&message).await,
                LogOutput::StdOut { message } | LogOutput::Console { message } => {
                    stdout.write_all(&message).await
                }
                LogOutput::StdIn { .. } => Ok(()),
            };
            if let Err(err) = written {
                warn!(container_id = id, error = %err, "dropping container log output");
            }
        }

        if let Err(err) = stdout.flush().await {
            warn!(container_id = id, error = %err, "could not flush container log output");
        }
        Ok(())
    }

    async fn stop_container(&self, id: &str) -> Result<(), EngineError> {
        match self
            .client
            .stop_container(id, None::<StopContainerOptions>)
            .await
        {
            Ok(()) => Ok(()),
            // 304: already stopped
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn remove_container(&self, id: &str, options: RemoveOptions) -> Result<(), EngineError> {
        self.client
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    v: options.remove_volumes,
                    link: options.remove_links,
                    force: options.force,
                }),
            )
            .await?;
        Ok(())
    }
}
