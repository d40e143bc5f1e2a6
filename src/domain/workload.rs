//! 工作负载相关领域模型
//!
//! 纯数据类型，无 tokio/axum 依赖

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 镜像 digest 可能携带的校验前缀
const DIGEST_PREFIXES: &[&str] = &["sha256:", "sha384:", "sha512:"];

/// 工作负载状态
///
/// `Undeployed` 是从未部署过的镜像的隐式初始状态，不会出现在注册表中。
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkloadState {
    Undeployed,
    Deploying,
    Running,
    Hibernating,
    Hibernated,
    Activating,
}

impl WorkloadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadState::Undeployed => "UNDEPLOYED",
            WorkloadState::Deploying => "DEPLOYING",
            WorkloadState::Running => "RUNNING",
            WorkloadState::Hibernating => "HIBERNATING",
            WorkloadState::Hibernated => "HIBERNATED",
            WorkloadState::Activating => "ACTIVATING",
        }
    }

    /// 状态机允许的转换
    pub fn can_transition_to(&self, next: WorkloadState) -> bool {
        use WorkloadState::*;
        matches!(
            (self, next),
            (Undeployed, Deploying)
                | (Undeployed, Activating)
                | (Deploying, Running)
                | (Running, Hibernating)
                | (Hibernating, Hibernated)
                | (Hibernating, Running)
                | (Hibernated, Activating)
                | (Activating, Running)
                | (Activating, Hibernated)
        )
    }
}

impl std::fmt::Display for WorkloadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 镜像引用 (repository + name)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageRef {
    pub repository: String,
    pub name: String,
}

impl ImageRef {
    pub fn new(repository: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            name: name.into(),
        }
    }

    /// 引擎使用的完整引用，repository 为空时只用镜像名
    pub fn reference(&self) -> String {
        if self.repository.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.repository, self.name)
        }
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.reference())
    }
}

/// 去掉镜像标识的校验前缀 (`sha256:<hex>` -> `<hex>`)
pub fn normalize_image_id(raw: &str) -> String {
    let trimmed = raw.trim();
    DIGEST_PREFIXES
        .iter()
        .find_map(|prefix| trimmed.strip_prefix(prefix))
        .unwrap_or(trimmed)
        .to_string()
}

/// 工作负载快照
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Workload {
    pub id: String,
    /// activate 直接按镜像 ID 启动时没有引用
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageRef>,
    /// 解析后的不可变镜像 ID
    pub image_id: String,
    pub port: Option<u16>,
    pub container_id: Option<String>,
    pub tunnel_url: Option<String>,
    pub state: WorkloadState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workload {
    pub fn new(id: String, image: Option<ImageRef>, image_id: String, state: WorkloadState) -> Self {
        let now = Utc::now();
        Self {
            id,
            image,
            image_id,
            port: None,
            container_id: None,
            tunnel_url: None,
            state,
            created_at: now,
            updated_at: now,
        }
    }

    /// 判断是否由给定（已规范化的）镜像 ID 启动
    pub fn matches_image(&self, normalized_id: &str) -> bool {
        !normalized_id.is_empty() && normalize_image_id(&self.image_id) == normalized_id
    }

    pub fn set_state(&mut self, state: WorkloadState) {
        self.state = state;
        self.updated_at = Utc::now();
    }
}

/// deploy 成功结果
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeployOutcome {
    pub tunnel_url: String,
    pub workload_id: String,
    pub image_identifier: String,
}

/// 操作状态
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Success,
    Error,
}

/// hibernate 结果
#[derive(Clone, Debug, PartialEq)]
pub enum HibernateOutcome {
    /// 已停止的容器
    Stopped { container_ids: Vec<String> },
    /// 没有匹配的容器
    NotFound,
    /// 内部错误（引擎通信失败等）
    Failed { reason: String },
}

impl HibernateOutcome {
    pub fn status(&self) -> OperationStatus {
        match self {
            HibernateOutcome::Stopped { .. } => OperationStatus::Success,
            _ => OperationStatus::Error,
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            HibernateOutcome::Stopped { .. } => 200,
            HibernateOutcome::NotFound => 404,
            HibernateOutcome::Failed { .. } => 500,
        }
    }
}

/// activate 结果
#[derive(Clone, Debug, PartialEq)]
pub enum ActivateOutcome {
    Activated { workload_id: String, tunnel_url: String },
    Failed { reason: String },
}

impl ActivateOutcome {
    pub fn status(&self) -> OperationStatus {
        match self {
            ActivateOutcome::Activated { .. } => OperationStatus::Success,
            ActivateOutcome::Failed { .. } => OperationStatus::Error,
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            ActivateOutcome::Activated { .. } => 200,
            ActivateOutcome::Failed { .. } => 500,
        }
    }

    /// 失败时为空字符串
    pub fn tunnel_url(&self) -> &str {
        match self {
            ActivateOutcome::Activated { tunnel_url, .. } => tunnel_url,
            ActivateOutcome::Failed { .. } => "",
        }
    }
}
