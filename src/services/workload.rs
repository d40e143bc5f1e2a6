//! 工作负载生命周期编排
//!
//! deploy / hibernate / activate 的状态机，也是工作负载状态的唯一持有者。
//!
//! 一次启动依次经过：镜像准备 -> 端口预留 -> 容器启动 -> 隧道打开。
//! 只有端口预留是串行的，其余外部调用都不持有任何锁。任何一步失败都会
//! 中止操作；已预留的端口随 `PortLease` 一起释放，已完成的其他步骤不回滚。
//!
//! 进入过渡状态的记录由 `PendingTransition` 看守：操作出错或调用方取消
//! （例如客户端断开导致 handler 被丢弃）时，记录会被删除或恢复。

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{
    normalize_image_id, ActivateOutcome, DeployOutcome, HibernateOutcome, ImageRef, PortRange,
    Workload, WorkloadState,
};
use crate::infra::{ContainerEngine, PortProbe};

use super::container::ContainerRuntime;
use super::error::{WorkloadError, WorkloadResult};
use super::image::ImageProvisioner;
use super::port_allocator::{PortAllocator, PortLease};
use super::tunnel::{TunnelProvider, TunnelSession};

/// 引擎报告的运行中状态
const CONTAINER_RUNNING: &str = "running";

/// 编排器配置
#[derive(Clone, Debug)]
pub struct OrchestratorSettings {
    pub port_range: PortRange,
    /// 容器内服务监听的端口
    pub container_port: u16,
    /// hibernate 停止所有匹配的容器，而不是只停第一个
    pub hibernate_all: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            port_range: PortRange::default(),
            container_port: 3000,
            hibernate_all: false,
        }
    }
}

struct WorkloadEntry {
    workload: Workload,
    lease: Option<PortLease>,
    tunnel: Option<TunnelSession>,
}

impl WorkloadEntry {
    fn new(workload: Workload) -> Self {
        Self {
            workload,
            lease: None,
            tunnel: None,
        }
    }

    /// 清空运行信息，交出隧道和端口预留
    fn mark_hibernated(&mut self) -> (Option<TunnelSession>, Option<PortLease>) {
        self.workload.port = None;
        self.workload.container_id = None;
        self.workload.tunnel_url = None;
        transition(&mut self.workload, WorkloadState::Hibernated);
        (self.tunnel.take(), self.lease.take())
    }

    /// 当前快照；隧道进程已退出时撤下 URL
    fn snapshot(&mut self) -> Workload {
        let exited = self.tunnel.as_mut().is_some_and(|t| !t.is_alive());
        if exited {
            if let Some(tunnel) = self.tunnel.take() {
                warn!(
                    workload_id = %self.workload.id,
                    port = tunnel.port(),
                    opened_at = %tunnel.opened_at(),
                    "Tunnel process exited, URL withdrawn"
                );
            }
            self.workload.tunnel_url = None;
        }
        self.workload.clone()
    }
}

type Registry = StdMutex<HashMap<String, WorkloadEntry>>;

fn lock_registry(registry: &Registry) -> MutexGuard<'_, HashMap<String, WorkloadEntry>> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 过渡状态未完成时如何恢复记录
#[derive(Clone, Copy, Debug)]
enum Rollback {
    /// 删除本次操作新建的记录
    Remove,
    /// 退回到指定状态
    Restore(WorkloadState),
    /// 容器可能已经停止：按已休眠处理，释放端口并关闭隧道
    Hibernate,
}

/// 处于过渡状态的一条记录
///
/// 在 `commit_running` / `finish_hibernate` 之前被丢弃时执行 `rollback`，
/// 出错返回和 future 被取消走同一条路径。
struct PendingTransition<'a> {
    registry: &'a Registry,
    workload_id: String,
    rollback: Option<Rollback>,
}

impl<'a> PendingTransition<'a> {
    fn new(registry: &'a Registry, workload_id: String, rollback: Rollback) -> Self {
        Self {
            registry,
            workload_id,
            rollback: Some(rollback),
        }
    }

    fn workload_id(&self) -> &str {
        &self.workload_id
    }

    /// 以另一种方式回滚
    fn roll_back_with(mut self, rollback: Rollback) {
        self.rollback = Some(rollback);
    }

    fn commit_running(mut self, image_id: Option<String>, launched: Launched) {
        self.rollback = None;

        let mut workloads = lock_registry(self.registry);
        let Some(entry) = workloads.get_mut(&self.workload_id) else {
            // launched 随之丢弃：端口释放，隧道进程被杀死
            warn!(workload_id = %self.workload_id, "Workload vanished before it could be recorded");
            return;
        };

        if let Some(image_id) = image_id {
            entry.workload.image_id = image_id;
        }
        entry.workload.port = Some(launched.lease.port());
        entry.workload.container_id = Some(launched.container_id);
        entry.workload.tunnel_url = Some(launched.tunnel.url().to_string());
        transition(&mut entry.workload, WorkloadState::Running);
        entry.lease = Some(launched.lease);
        entry.tunnel = Some(launched.tunnel);
    }

    /// 容器已停止，返回待关闭的隧道
    fn finish_hibernate(mut self) -> Option<TunnelSession> {
        self.rollback = None;

        let (tunnel, lease) = match lock_registry(self.registry).get_mut(&self.workload_id) {
            Some(entry) => entry.mark_hibernated(),
            None => (None, None),
        };
        // 端口可以复用
        drop(lease);
        tunnel
    }
}

impl Drop for PendingTransition<'_> {
    fn drop(&mut self) {
        let Some(rollback) = self.rollback.take() else {
            return;
        };

        let released = {
            let mut workloads = lock_registry(self.registry);
            match rollback {
                Rollback::Remove => workloads
                    .remove(&self.workload_id)
                    .map(|entry| (entry.tunnel, entry.lease)),
                Rollback::Restore(state) => {
                    if let Some(entry) = workloads.get_mut(&self.workload_id) {
                        transition(&mut entry.workload, state);
                    }
                    None
                }
                Rollback::Hibernate => workloads
                    .get_mut(&self.workload_id)
                    .map(WorkloadEntry::mark_hibernated),
            }
        };
        drop(released);

        debug!(workload_id = %self.workload_id, rollback = ?rollback, "Workload transition rolled back");
    }
}

/// 一次成功启动的产物
struct Launched {
    lease: PortLease,
    container_id: String,
    tunnel: TunnelSession,
}

/// 生命周期编排器
pub struct LifecycleOrchestrator {
    images: ImageProvisioner,
    ports: PortAllocator,
    runtime: ContainerRuntime,
    tunnels: Arc<dyn TunnelProvider>,
    workloads: Registry,
    settings: OrchestratorSettings,
}

impl LifecycleOrchestrator {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        probe: Arc<dyn PortProbe>,
        tunnels: Arc<dyn TunnelProvider>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            images: ImageProvisioner::new(engine.clone()),
            ports: PortAllocator::new(probe),
            runtime: ContainerRuntime::new(engine),
            tunnels,
            workloads: StdMutex::new(HashMap::new()),
            settings,
        }
    }

    /// 部署镜像并返回公网 URL
    ///
    /// `repository` 为空时直接使用镜像名。
    pub async fn deploy(&self, image_name: &str, repository: &str) -> WorkloadResult<DeployOutcome> {
        let image = validate_image(image_name, repository)?;
        let workload_id = Uuid::new_v4().to_string();
        info!(workload_id = %workload_id, image = %image, "Deploying workload");

        let pending = self.track(
            Workload::new(
                workload_id.clone(),
                Some(image.clone()),
                String::new(),
                WorkloadState::Deploying,
            ),
            Rollback::Remove,
        );

        match self.provision_and_launch(&image).await {
            Ok((image_id, launched)) => {
                let tunnel_url = launched.tunnel.url().to_string();
                pending.commit_running(Some(image_id.clone()), launched);
                info!(
                    workload_id = %workload_id,
                    image_id = %image_id,
                    tunnel_url = %tunnel_url,
                    "Workload deployed"
                );
                Ok(DeployOutcome {
                    tunnel_url,
                    workload_id,
                    image_identifier: image_id,
                })
            }
            Err(e) => {
                drop(pending);
                warn!(workload_id = %workload_id, kind = e.kind(), error = %e, "Deploy failed");
                Err(e)
            }
        }
    }

    /// 停止由该镜像启动的容器
    ///
    /// 默认只停第一个匹配的容器（运行中的优先）；`hibernate_all` 打开时全部停止。
    /// 不在注册表中的容器（例如上一个进程启动的）同样会被停止。
    pub async fn hibernate(&self, image_id: &str) -> HibernateOutcome {
        let normalized = normalize_image_id(image_id);
        if normalized.is_empty() {
            return HibernateOutcome::Failed {
                reason: "image identifier is required".to_string(),
            };
        }

        let mut targets = match self.runtime.list_by_ancestor(&normalized).await {
            Ok(containers) => containers,
            Err(e) => {
                warn!(image_id = %normalized, error = %e, "Failed to list containers");
                return HibernateOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        if targets.is_empty() {
            info!(image_id = %normalized, "No container to hibernate");
            return HibernateOutcome::NotFound;
        }

        // 稳定排序，运行中的容器排在前面
        targets.sort_by_key(|c| c.state != CONTAINER_RUNNING);
        if !self.settings.hibernate_all && targets.len() > 1 {
            info!(
                image_id = %normalized,
                matches = targets.len(),
                "Multiple containers match, hibernating the first"
            );
            targets.truncate(1);
        }

        let mut stopped = Vec::new();
        for container in targets {
            debug!(
                container_id = %container.id,
                names = ?container.names,
                state = %container.state,
                image_id = %container.image_id,
                "Hibernating container"
            );
            let pending = self.begin_hibernate(&container.id);

            match self.runtime.stop(&container.id).await {
                Ok(()) => {
                    close_after_hibernate(pending).await;
                    stopped.push(container.id);
                }
                // 在 list 和 stop 之间已经退出
                Err(WorkloadError::ContainerNotFound(_)) => {
                    close_after_hibernate(pending).await;
                }
                Err(e) => {
                    if let Some(pending) = pending {
                        pending.roll_back_with(Rollback::Restore(WorkloadState::Running));
                    }
                    warn!(container_id = %container.id, error = %e, "Failed to stop container");
                    return HibernateOutcome::Failed {
                        reason: e.to_string(),
                    };
                }
            }
        }

        if stopped.is_empty() {
            return HibernateOutcome::NotFound;
        }

        info!(image_id = %normalized, containers = ?stopped, "Workload hibernated");
        HibernateOutcome::Stopped {
            container_ids: stopped,
        }
    }

    /// 从镜像 ID 重新启动一个新容器并打开新隧道
    ///
    /// 容器以 auto-remove 方式运行，hibernate 之后旧容器已不存在，
    /// 这里总是创建新实例。失败时返回结构化结果，不返回错误。
    pub async fn activate(&self, image_id: &str) -> ActivateOutcome {
        let normalized = normalize_image_id(image_id);
        if normalized.is_empty() {
            return ActivateOutcome::Failed {
                reason: "image identifier is required".to_string(),
            };
        }

        let (pending, reused) = self.begin_activate(&normalized);
        let workload_id = pending.workload_id().to_string();
        info!(workload_id = %workload_id, image_id = %normalized, reused, "Activating workload");

        match self.launch(&normalized).await {
            Ok(launched) => {
                let tunnel_url = launched.tunnel.url().to_string();
                pending.commit_running(None, launched);
                info!(workload_id = %workload_id, tunnel_url = %tunnel_url, "Workload activated");
                ActivateOutcome::Activated {
                    workload_id,
                    tunnel_url,
                }
            }
            Err(e) => {
                drop(pending);
                warn!(workload_id = %workload_id, kind = e.kind(), error = %e, "Activate failed");
                ActivateOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// 所有工作负载快照，按创建时间排序
    pub async fn list_workloads(&self) -> Vec<Workload> {
        let mut snapshots: Vec<Workload> = lock_registry(&self.workloads)
            .values_mut()
            .map(WorkloadEntry::snapshot)
            .collect();
        snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        snapshots
    }

    pub async fn get_workload(&self, id: &str) -> Option<Workload> {
        lock_registry(&self.workloads)
            .get_mut(id)
            .map(WorkloadEntry::snapshot)
    }

    pub fn reserved_ports(&self) -> Vec<u16> {
        self.ports.reserved_ports()
    }

    pub fn port_range(&self) -> PortRange {
        self.settings.port_range
    }

    /// 关闭所有隧道进程
    pub async fn shutdown(&self) {
        let sessions: Vec<TunnelSession> = lock_registry(&self.workloads)
            .values_mut()
            .filter_map(|e| e.tunnel.take())
            .collect();

        info!(tunnels = sessions.len(), "Closing tunnels");
        for session in sessions {
            session.close().await;
        }
    }

    fn track(&self, workload: Workload, rollback: Rollback) -> PendingTransition<'_> {
        let workload_id = workload.id.clone();
        lock_registry(&self.workloads).insert(workload_id.clone(), WorkloadEntry::new(workload));
        PendingTransition::new(&self.workloads, workload_id, rollback)
    }

    async fn provision_and_launch(&self, image: &ImageRef) -> WorkloadResult<(String, Launched)> {
        let image_id = self.images.ensure(image).await?;
        let launched = self.launch(&image.reference()).await?;
        Ok((image_id, launched))
    }

    /// 端口 -> 容器 -> 隧道
    async fn launch(&self, image: &str) -> WorkloadResult<Launched> {
        let lease = self.ports.allocate(self.settings.port_range).await?;
        let port = lease.port();

        let container_id = self
            .runtime
            .run(image, port, self.settings.container_port)
            .await?;

        let tunnel = match self.tunnels.open(port).await {
            Ok(tunnel) => tunnel,
            Err(e) => {
                warn!(
                    port,
                    container_id = %container_id,
                    "Tunnel failed, container is left running"
                );
                return Err(e);
            }
        };

        Ok(Launched {
            lease,
            container_id,
            tunnel,
        })
    }

    /// 标记正在运行该容器的工作负载
    fn begin_hibernate(&self, container_id: &str) -> Option<PendingTransition<'_>> {
        let mut workloads = lock_registry(&self.workloads);
        let entry = workloads.values_mut().find(|e| {
            e.workload.state == WorkloadState::Running
                && e.workload.container_id.as_deref() == Some(container_id)
        })?;
        transition(&mut entry.workload, WorkloadState::Hibernating);
        Some(PendingTransition::new(
            &self.workloads,
            entry.workload.id.clone(),
            Rollback::Hibernate,
        ))
    }

    /// 复用同一镜像的已休眠工作负载，没有则新建记录
    fn begin_activate(&self, normalized: &str) -> (PendingTransition<'_>, bool) {
        let mut workloads = lock_registry(&self.workloads);

        let hibernated = workloads
            .values_mut()
            .filter(|e| {
                e.workload.state == WorkloadState::Hibernated && e.workload.matches_image(normalized)
            })
            .min_by_key(|e| e.workload.created_at);

        if let Some(entry) = hibernated {
            transition(&mut entry.workload, WorkloadState::Activating);
            let pending = PendingTransition::new(
                &self.workloads,
                entry.workload.id.clone(),
                Rollback::Restore(WorkloadState::Hibernated),
            );
            return (pending, true);
        }
        drop(workloads);

        let pending = self.track(
            Workload::new(
                Uuid::new_v4().to_string(),
                None,
                normalized.to_string(),
                WorkloadState::Activating,
            ),
            Rollback::Remove,
        );
        (pending, false)
    }
}

async fn close_after_hibernate(pending: Option<PendingTransition<'_>>) {
    if let Some(tunnel) = pending.and_then(PendingTransition::finish_hibernate) {
        tunnel.close().await;
    }
}

fn transition(workload: &mut Workload, next: WorkloadState) {
    if !workload.state.can_transition_to(next) {
        warn!(
            workload_id = %workload.id,
            from = %workload.state,
            to = %next,
            "Unexpected workload state transition"
        );
    }
    workload.set_state(next);
}

fn validate_image(image_name: &str, repository: &str) -> WorkloadResult<ImageRef> {
    let name = image_name.trim();
    if name.is_empty() {
        return Err(WorkloadError::validation("imageName is required"));
    }

    let repository = repository.trim();
    if name.chars().any(char::is_whitespace) || repository.chars().any(char::is_whitespace) {
        return Err(WorkloadError::validation(
            "imageName and repository must not contain whitespace",
        ));
    }

    Ok(ImageRef::new(repository, name))
}
