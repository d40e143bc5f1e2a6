//! 端口分配器
//!
//! 扫描 + 预留在同一把锁内完成，两个并发部署不会拿到同一个端口。
//! 预留以 `PortLease` 的形式交给调用方，lease 被丢弃时自动释放。

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::PortRange;
use crate::infra::PortProbe;

use super::error::{WorkloadError, WorkloadResult};

/// port -> 预留代号
type AllocationTable = Arc<StdMutex<BTreeMap<u16, u64>>>;

fn lock_table(table: &AllocationTable) -> std::sync::MutexGuard<'_, BTreeMap<u16, u64>> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 端口预留凭证
///
/// 持有期间端口不会被再次分配；drop 时释放。
#[derive(Debug)]
pub struct PortLease {
    port: u16,
    generation: u64,
    table: AllocationTable,
}

impl PortLease {
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        let mut table = lock_table(&self.table);
        // 端口可能已被显式释放并重新分配给别人
        if table.get(&self.port) == Some(&self.generation) {
            table.remove(&self.port);
            debug!(port = self.port, "Port reservation released");
        }
    }
}

/// 端口分配器
pub struct PortAllocator {
    probe: Arc<dyn PortProbe>,
    /// 串行化扫描过程
    scan_lock: Mutex<()>,
    /// 已预留端口
    reserved: AllocationTable,
    next_generation: AtomicU64,
}

impl PortAllocator {
    pub fn new(probe: Arc<dyn PortProbe>) -> Self {
        Self {
            probe,
            scan_lock: Mutex::new(()),
            reserved: Arc::new(StdMutex::new(BTreeMap::new())),
            next_generation: AtomicU64::new(1),
        }
    }

    /// 在范围内按升序寻找第一个空闲端口并预留
    ///
    /// 已预留但尚未被容器绑定的端口同样视为占用。
    pub async fn allocate(&self, range: PortRange) -> WorkloadResult<PortLease> {
        let _scan = self.scan_lock.lock().await;

        for port in range.iter() {
            if lock_table(&self.reserved).contains_key(&port) {
                continue;
            }
            if self.probe.is_in_use(port).await {
                debug!(port, "Port in use, skipping");
                continue;
            }

            let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
            lock_table(&self.reserved).insert(port, generation);
            info!(port, range = %range, "Port reserved");
            return Ok(PortLease {
                port,
                generation,
                table: self.reserved.clone(),
            });
        }

        warn!(range = %range, "Port range exhausted");
        Err(WorkloadError::PortExhausted {
            low: range.low(),
            high: range.high(),
        })
    }

    /// 显式释放端口，返回该端口此前是否被预留
    pub fn release(&self, port: u16) -> bool {
        let removed = lock_table(&self.reserved).remove(&port).is_some();
        if removed {
            debug!(port, "Port released");
        }
        removed
    }

    pub fn is_reserved(&self, port: u16) -> bool {
        lock_table(&self.reserved).contains_key(&port)
    }

    /// 当前预留的端口（升序）
    pub fn reserved_ports(&self) -> Vec<u16> {
        lock_table(&self.reserved).keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::FakeProbe;
    use std::time::Duration;

    fn range(low: u16, high: u16) -> PortRange {
        PortRange::new(low, high).unwrap()
    }

    #[tokio::test]
    async fn test_allocates_lowest_free_port() {
        let probe = Arc::new(FakeProbe::new());
        probe.occupy(3000);
        let allocator = PortAllocator::new(probe);

        let lease = allocator.allocate(range(3000, 3010)).await.unwrap();
        assert_eq!(lease.port(), 3001);
        assert!(allocator.is_reserved(3001));
    }

    #[tokio::test]
    async fn test_reserved_port_is_skipped() {
        let probe = Arc::new(FakeProbe::new());
        let allocator = PortAllocator::new(probe.clone());

        let first = allocator.allocate(range(3000, 3010)).await.unwrap();
        let second = allocator.allocate(range(3000, 3010)).await.unwrap();
        assert_eq!(first.port(), 3000);
        assert_eq!(second.port(), 3001);
        assert_eq!(allocator.reserved_ports(), vec![3000, 3001]);
        // 已预留的 3000 不再探测
        assert_eq!(probe.probe_count(), 2);
    }

    #[tokio::test]
    async fn test_dropping_lease_releases_port() {
        let allocator = PortAllocator::new(Arc::new(FakeProbe::new()));

        let lease = allocator.allocate(range(3000, 3000)).await.unwrap();
        assert!(allocator.allocate(range(3000, 3000)).await.is_err());
        drop(lease);

        assert!(allocator.reserved_ports().is_empty());
        let lease = allocator.allocate(range(3000, 3000)).await.unwrap();
        assert_eq!(lease.port(), 3000);
    }

    #[tokio::test]
    async fn test_exhausted_range_reserves_nothing() {
        let probe = Arc::new(FakeProbe::new());
        probe.occupy(3000);
        probe.occupy(3001);
        let allocator = PortAllocator::new(probe);

        let err = allocator.allocate(range(3000, 3001)).await.unwrap_err();
        assert_eq!(err, WorkloadError::PortExhausted { low: 3000, high: 3001 });
        assert!(allocator.reserved_ports().is_empty());
    }

    #[tokio::test]
    async fn test_explicit_release() {
        let allocator = PortAllocator::new(Arc::new(FakeProbe::new()));
        let lease = allocator.allocate(range(3000, 3010)).await.unwrap();

        assert!(allocator.release(lease.port()));
        assert!(!allocator.release(lease.port()));

        // 旧 lease 不能释放新分配
        let reallocated = allocator.allocate(range(3000, 3010)).await.unwrap();
        assert_eq!(reallocated.port(), lease.port());
        drop(lease);
        assert!(allocator.is_reserved(reallocated.port()));
    }

    #[tokio::test]
    async fn test_concurrent_allocations_are_distinct() {
        // 慢探测让并发扫描有机会交错
        let probe = Arc::new(FakeProbe::with_delay(Duration::from_millis(20)));
        let allocator = Arc::new(PortAllocator::new(probe));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let allocator = allocator.clone();
            handles.push(tokio::spawn(async move {
                allocator.allocate(range(3000, 3010)).await.unwrap()
            }));
        }

        let mut leases = Vec::new();
        for handle in handles {
            leases.push(handle.await.unwrap());
        }
        let mut ports: Vec<u16> = leases.iter().map(|l| l.port()).collect();
        ports.sort_unstable();
        ports.dedup();
        assert_eq!(ports.len(), 4);
    }
}
