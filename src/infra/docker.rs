//! Container engine client
//!
//! `ContainerEngine` is the seam the services talk to; `BollardEngine` is the
//! real implementation over the Docker Engine API.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding};
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, info};

/// Grace period given to a container before it is killed on stop.
const STOP_GRACE_SECS: i64 = 10;

/// Engine-level failure, decoupled from the client library's error type.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    /// 304 - the requested state change already happened
    #[error("not modified")]
    NotModified,

    #[error("engine returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("engine stream error: {0}")]
    Stream(String),

    #[error("engine unreachable: {0}")]
    Transport(String),
}

impl From<bollard::errors::Error> for EngineError {
    fn from(err: bollard::errors::Error) -> Self {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => EngineError::NotFound(message),
            bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            } => EngineError::NotModified,
            bollard::errors::Error::DockerResponseServerError {
                status_code,
                message,
            } => EngineError::Api {
                status: status_code,
                message,
            },
            bollard::errors::Error::DockerStreamError { error } => EngineError::Stream(error),
            other => EngineError::Transport(other.to_string()),
        }
    }
}

/// Everything needed to create one published container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub image: String,
    pub host_port: u16,
    pub container_port: u16,
    pub cap_drop: Vec<String>,
    pub cap_add: Vec<String>,
    pub auto_remove: bool,
}

/// Subset of the engine's container listing the services care about.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSummary {
    pub id: String,
    pub image_id: String,
    pub state: String,
    pub names: Vec<String>,
}

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Returns the immutable image id for `reference`.
    async fn inspect_image(&self, reference: &str) -> Result<String, EngineError>;
    /// Pulls `reference`, completing only once the transfer has finished.
    async fn pull_image(&self, reference: &str) -> Result<(), EngineError>;
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError>;
    async fn start_container(&self, id: &str) -> Result<(), EngineError>;
    /// Lists running and stopped containers instantiated from `image`.
    async fn list_containers_by_ancestor(
        &self,
        image: &str,
    ) -> Result<Vec<ContainerSummary>, EngineError>;
    async fn stop_container(&self, id: &str) -> Result<(), EngineError>;
    async fn remove_container(&self, id: &str) -> Result<(), EngineError>;
}

/// Docker Engine API client.
#[derive(Clone)]
pub struct BollardEngine {
    docker: Docker,
}

impl BollardEngine {
    /// Connects with the platform defaults (`DOCKER_HOST` or the local socket).
    pub fn connect(timeout: Duration) -> Result<Self, EngineError> {
        let docker = Docker::connect_with_local_defaults()?.with_timeout(timeout);
        Ok(Self { docker })
    }

    fn to_bollard_config(spec: &ContainerSpec) -> Config<String> {
        let port_key = format!("{}/tcp", spec.container_port);

        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            port_key.clone(),
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some(spec.host_port.to_string()),
            }]),
        );

        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(port_key, HashMap::new());

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            cap_drop: Some(spec.cap_drop.clone()),
            cap_add: Some(spec.cap_add.clone()),
            auto_remove: Some(spec.auto_remove),
            ..Default::default()
        };

        Config {
            image: Some(spec.image.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ContainerEngine for BollardEngine {
    async fn inspect_image(&self, reference: &str) -> Result<String, EngineError> {
        let inspect = self.docker.inspect_image(reference).await?;
        inspect.id.ok_or_else(|| EngineError::Api {
            status: 200,
            message: format!("image '{}' has no id", reference),
        })
    }

    async fn pull_image(&self, reference: &str) -> Result<(), EngineError> {
        let options = CreateImageOptions {
            from_image: reference.to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            let info = result?;
            if let Some(status) = info.status {
                debug!(
                    image = %reference,
                    status = %status,
                    progress = info.progress.as_deref().unwrap_or(""),
                    "Pull progress"
                );
            }
        }

        info!(image = %reference, "Image pulled");
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        let config = Self::to_bollard_config(spec);
        let response = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await?;
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.docker.start_container::<String>(id, None).await?;
        Ok(())
    }

    async fn list_containers_by_ancestor(
        &self,
        image: &str,
    ) -> Result<Vec<ContainerSummary>, EngineError> {
        let mut filters: HashMap<String, Vec<String>> = HashMap::new();
        filters.insert("ancestor".to_string(), vec![image.to_string()]);

        let options = ListContainersOptions::<String> {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self.docker.list_containers(Some(options)).await?;
        Ok(containers
            .into_iter()
            .filter_map(|c| {
                Some(ContainerSummary {
                    id: c.id?,
                    image_id: c.image_id.unwrap_or_default(),
                    state: c.state.unwrap_or_default(),
                    names: c.names.unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn stop_container(&self, id: &str) -> Result<(), EngineError> {
        match self
            .docker
            .stop_container(id, Some(StopContainerOptions { t: STOP_GRACE_SECS }))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => match EngineError::from(e) {
                // already stopped
                EngineError::NotModified => Ok(()),
                other => Err(other),
            },
        }
    }

    async fn remove_container(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_from_bollard() {
        let err = bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message: "No such image: myrepo/app".to_string(),
        };
        assert!(matches!(EngineError::from(err), EngineError::NotFound(_)));

        let err = bollard::errors::Error::DockerResponseServerError {
            status_code: 304,
            message: String::new(),
        };
        assert_eq!(EngineError::from(err), EngineError::NotModified);

        let err = bollard::errors::Error::DockerResponseServerError {
            status_code: 500,
            message: "boom".to_string(),
        };
        assert_eq!(
            EngineError::from(err),
            EngineError::Api {
                status: 500,
                message: "boom".to_string()
            }
        );
    }

    #[test]
    fn test_bollard_config_applies_security_and_ports() {
        let spec = ContainerSpec {
            image: "myrepo/app".to_string(),
            host_port: 3004,
            container_port: 3000,
            cap_drop: vec!["ALL".to_string()],
            cap_add: vec!["NET_RAW".to_string(), "NET_BIND_SERVICE".to_string()],
            auto_remove: true,
        };

        let config = BollardEngine::to_bollard_config(&spec);
        assert_eq!(config.image.as_deref(), Some("myrepo/app"));
        assert!(config.exposed_ports.unwrap().contains_key("3000/tcp"));

        let host = config.host_config.unwrap();
        assert_eq!(host.auto_remove, Some(true));
        assert_eq!(host.cap_drop, Some(vec!["ALL".to_string()]));
        let bindings = host.port_bindings.unwrap();
        let binding = bindings["3000/tcp"].as_ref().unwrap();
        assert_eq!(binding[0].host_port.as_deref(), Some("3004"));
    }
}
