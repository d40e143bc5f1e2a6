//! 测试替身
//!
//! 记录型 fake，替换引擎、端口探测和隧道进程，编排逻辑测试不依赖 Docker 或子进程。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::normalize_image_id;
use crate::infra::{ContainerEngine, ContainerSpec, ContainerSummary, EngineError, PortProbe};

use super::error::{WorkloadError, WorkloadResult};
use super::tunnel::{TunnelProvider, TunnelSession};

#[derive(Default)]
struct EngineState {
    /// reference -> image id
    images: HashMap<String, String>,
    pullable: HashMap<String, String>,
    pulls: usize,
    inspect_failure: Option<EngineError>,
    list_failure: Option<EngineError>,
    create_failure: Option<EngineError>,
    start_failure: Option<EngineError>,
    stop_failure: Option<EngineError>,
    created: Vec<ContainerSpec>,
    containers: Vec<ContainerSummary>,
    stopped: Vec<String>,
    /// stop 生效之后再等待的时长
    stop_delay: Option<Duration>,
    removed: Vec<String>,
    next_id: usize,
}

/// 内存中的容器引擎
///
/// 停止即删除，与 auto-remove 容器一致。
#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<EngineState>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_image(&self, reference: &str, id: &str) {
        self.state
            .lock()
            .unwrap()
            .images
            .insert(reference.to_string(), id.to_string());
    }

    /// 本地不存在，但 pull 之后可用
    pub fn set_pullable(&self, reference: &str, id: &str) {
        self.state
            .lock()
            .unwrap()
            .pullable
            .insert(reference.to_string(), id.to_string());
    }

    /// 预置一个正在运行的容器
    pub fn add_container(&self, image_id: &str, container_id: &str) {
        self.add_container_in_state(image_id, container_id, "running");
    }

    pub fn add_container_in_state(&self, image_id: &str, container_id: &str, state: &str) {
        self.state.lock().unwrap().containers.push(ContainerSummary {
            id: container_id.to_string(),
            image_id: image_id.to_string(),
            state: state.to_string(),
            names: vec![format!("/{}", container_id)],
        });
    }

    pub fn fail_inspect(&self, err: EngineError) {
        self.state.lock().unwrap().inspect_failure = Some(err);
    }

    pub fn fail_list(&self, err: EngineError) {
        self.state.lock().unwrap().list_failure = Some(err);
    }

    pub fn fail_create(&self, err: EngineError) {
        self.state.lock().unwrap().create_failure = Some(err);
    }

    pub fn fail_start(&self, err: EngineError) {
        self.state.lock().unwrap().start_failure = Some(err);
    }

    pub fn fail_stop(&self, err: EngineError) {
        self.state.lock().unwrap().stop_failure = Some(err);
    }

    /// stop 先生效，再延迟返回
    pub fn delay_stop(&self, delay: Duration) {
        self.state.lock().unwrap().stop_delay = Some(delay);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock().unwrap();
        state.inspect_failure = None;
        state.list_failure = None;
        state.create_failure = None;
        state.start_failure = None;
        state.stop_failure = None;
    }

    pub fn pull_count(&self) -> usize {
        self.state.lock().unwrap().pulls
    }

    pub fn created(&self) -> Vec<ContainerSpec> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.state.lock().unwrap().stopped.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.state.lock().unwrap().removed.clone()
    }

    /// 仍然存在的容器 ID
    pub fn container_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .containers
            .iter()
            .map(|c| c.id.clone())
            .collect()
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn inspect_image(&self, reference: &str) -> Result<String, EngineError> {
        let state = self.state.lock().unwrap();
        if let Some(err) = &state.inspect_failure {
            return Err(err.clone());
        }
        state
            .images
            .get(reference)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("No such image: {}", reference)))
    }

    async fn pull_image(&self, reference: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        state.pulls += 1;
        match state.pullable.get(reference).cloned() {
            Some(id) => {
                state.images.insert(reference.to_string(), id);
                Ok(())
            }
            None => Err(EngineError::Stream(format!(
                "pull access denied for {}",
                reference
            ))),
        }
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = &state.create_failure {
            return Err(err.clone());
        }
        state.next_id += 1;
        let id = format!("container-{}", state.next_id);
        let image_id = state
            .images
            .get(&spec.image)
            .cloned()
            .unwrap_or_else(|| spec.image.clone());

        state.created.push(spec.clone());
        state.containers.push(ContainerSummary {
            id: id.clone(),
            image_id,
            state: "created".to_string(),
            names: vec![format!("/{}", id)],
        });
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = &state.start_failure {
            return Err(err.clone());
        }
        match state.containers.iter_mut().find(|c| c.id == id) {
            Some(container) => {
                container.state = "running".to_string();
                Ok(())
            }
            None => Err(EngineError::NotFound(id.to_string())),
        }
    }

    async fn list_containers_by_ancestor(
        &self,
        image: &str,
    ) -> Result<Vec<ContainerSummary>, EngineError> {
        let state = self.state.lock().unwrap();
        if let Some(err) = &state.list_failure {
            return Err(err.clone());
        }
        let wanted = normalize_image_id(image);
        Ok(state
            .containers
            .iter()
            .filter(|c| normalize_image_id(&c.image_id) == wanted)
            .cloned()
            .collect())
    }

    async fn stop_container(&self, id: &str) -> Result<(), EngineError> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            if let Some(err) = &state.stop_failure {
                return Err(err.clone());
            }
            let before = state.containers.len();
            state.containers.retain(|c| c.id != id);
            if state.containers.len() == before {
                return Err(EngineError::NotFound(id.to_string()));
            }
            state.stopped.push(id.to_string());
            state.stop_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        state.containers.retain(|c| c.id != id);
        state.removed.push(id.to_string());
        Ok(())
    }
}

/// 端口探测 fake
#[derive(Default)]
pub struct FakeProbe {
    occupied: Mutex<HashSet<u16>>,
    delay: Option<Duration>,
    probes: AtomicUsize,
}

impl FakeProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次探测都先 sleep，用于制造并发交错
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn occupy(&self, port: u16) {
        self.occupied.lock().unwrap().insert(port);
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PortProbe for FakeProbe {
    async fn is_in_use(&self, port: u16) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.occupied.lock().unwrap().contains(&port)
    }
}

/// 返回固定格式 URL 的隧道 fake
#[derive(Default)]
pub struct FakeTunnelProvider {
    opened: Mutex<Vec<u16>>,
    failure: Mutex<Option<WorkloadError>>,
    delay: Mutex<Option<Duration>>,
}

impl FakeTunnelProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(&self, err: WorkloadError) {
        *self.failure.lock().unwrap() = Some(err);
    }

    /// open 在返回前先等待
    pub fn delay_open(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// 清除注入的失败和延迟
    pub fn recover(&self) {
        *self.failure.lock().unwrap() = None;
        *self.delay.lock().unwrap() = None;
    }

    /// 成功打开过隧道的端口
    pub fn opened_ports(&self) -> Vec<u16> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl TunnelProvider for FakeTunnelProvider {
    async fn open(&self, port: u16) -> WorkloadResult<TunnelSession> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }
        let mut opened = self.opened.lock().unwrap();
        opened.push(port);
        let url = format!("https://w{}.loca.lt", opened.len());
        Ok(TunnelSession::detached(port, url))
    }
}
