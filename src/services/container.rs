//! 容器运行时
//!
//! 所有容器都以固定的安全基线启动：丢弃全部 capability，只保留
//! NET_RAW 与 NET_BIND_SERVICE；后台运行，退出后自动删除。

use std::sync::Arc;

use tracing::{info, warn};

use crate::infra::{ContainerEngine, ContainerSpec, ContainerSummary};

use super::error::{WorkloadError, WorkloadResult};

const CAP_DROP: &[&str] = &["ALL"];
const CAP_ADD: &[&str] = &["NET_RAW", "NET_BIND_SERVICE"];

pub struct ContainerRuntime {
    engine: Arc<dyn ContainerEngine>,
}

impl ContainerRuntime {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self { engine }
    }

    fn spec(image: &str, host_port: u16, container_port: u16) -> ContainerSpec {
        ContainerSpec {
            image: image.to_string(),
            host_port,
            container_port,
            cap_drop: CAP_DROP.iter().map(|c| c.to_string()).collect(),
            cap_add: CAP_ADD.iter().map(|c| c.to_string()).collect(),
            auto_remove: true,
        }
    }

    /// 创建并启动容器，返回容器 ID
    ///
    /// `image` 可以是镜像引用，也可以是镜像 ID。
    pub async fn run(
        &self,
        image: &str,
        host_port: u16,
        container_port: u16,
    ) -> WorkloadResult<String> {
        let spec = Self::spec(image, host_port, container_port);

        let id = self
            .engine
            .create_container(&spec)
            .await
            .map_err(|e| start_error(image, e))?;

        if let Err(e) = self.engine.start_container(&id).await {
            // 已创建但未启动的容器不会被 auto-remove
            if let Err(remove_err) = self.engine.remove_container(&id).await {
                warn!(container_id = %id, error = %remove_err, "Failed to remove unstarted container");
            }
            return Err(start_error(image, e));
        }

        info!(
            container_id = %id,
            image = %image,
            host_port,
            container_port,
            "Container started"
        );
        Ok(id)
    }

    /// 由该镜像实例化的容器（运行中和已停止）
    pub async fn list_by_ancestor(&self, image_id: &str) -> WorkloadResult<Vec<ContainerSummary>> {
        Ok(self.engine.list_containers_by_ancestor(image_id).await?)
    }

    pub async fn stop(&self, container_id: &str) -> WorkloadResult<()> {
        self.engine.stop_container(container_id).await?;
        info!(container_id = %container_id, "Container stopped");
        Ok(())
    }
}

fn start_error(image: &str, err: impl std::fmt::Display) -> WorkloadError {
    WorkloadError::ContainerStart {
        image: image.to_string(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::EngineError;
    use crate::services::testing::FakeEngine;

    #[tokio::test]
    async fn test_run_applies_security_baseline() {
        let engine = Arc::new(FakeEngine::new());
        let runtime = ContainerRuntime::new(engine.clone());

        let id = runtime.run("myrepo/app", 3002, 3000).await.unwrap();
        assert!(engine.container_ids().contains(&id));

        let created = engine.created();
        assert_eq!(created.len(), 1);
        let spec = &created[0];
        assert_eq!(spec.host_port, 3002);
        assert_eq!(spec.container_port, 3000);
        assert_eq!(spec.cap_drop, vec!["ALL"]);
        assert_eq!(spec.cap_add, vec!["NET_RAW", "NET_BIND_SERVICE"]);
        assert!(spec.auto_remove);
    }

    #[tokio::test]
    async fn test_start_failure_removes_container() {
        let engine = Arc::new(FakeEngine::new());
        engine.fail_start(EngineError::Api {
            status: 500,
            message: "port is already allocated".to_string(),
        });
        let runtime = ContainerRuntime::new(engine.clone());

        let err = runtime.run("myrepo/app", 3002, 3000).await.unwrap_err();
        assert!(matches!(err, WorkloadError::ContainerStart { .. }));
        assert_eq!(engine.removed().len(), 1);
        assert!(engine.container_ids().is_empty());
    }

    #[tokio::test]
    async fn test_stop_unknown_container() {
        let runtime = ContainerRuntime::new(Arc::new(FakeEngine::new()));

        let err = runtime.stop("missing").await.unwrap_err();
        assert_eq!(err, WorkloadError::ContainerNotFound("missing".to_string()));
    }

    #[tokio::test]
    async fn test_list_fault_is_communication_error() {
        let engine = Arc::new(FakeEngine::new());
        engine.fail_list(EngineError::Transport("connection refused".to_string()));
        let runtime = ContainerRuntime::new(engine);

        let err = runtime.list_by_ancestor("abc123").await.unwrap_err();
        assert!(matches!(err, WorkloadError::RuntimeCommunication(_)));
    }
}
