use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use crate::models::Record;

#[derive(Default)]
struct CoordinatorState {
    in_flight: bool,
    pending: bool,
    records: Arc<Vec<Record>>,
    last_scan: Option<SystemTime>,
}

/// 扫描协调器：同一时刻至多一个发现周期在运行
///
/// 运行期间的触发会合并成一次后续重跑（单个标志位，而非队列）。
/// 失败的周期不会覆盖上一次成功的结果。
#[derive(Default)]
pub struct ScanCoordinator {
    state: Mutex<CoordinatorState>,
}

impl ScanCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// 尝试开始一个周期；已有周期在运行时记下待重跑并返回 false
    pub fn try_begin(&self) -> bool {
        let mut state = self.lock();
        if state.in_flight {
            state.pending = true;
            return false;
        }
        state.in_flight = true;
        true
    }

    /// 结束当前周期
    ///
    /// 成功时原子替换记录集。返回 true 表示有合并的重跑请求，
    /// 此时协调器保持运行状态，调用方应立即再跑一轮。
    pub fn complete(&self, result: Option<Vec<Record>>) -> bool {
        let mut state = self.lock();
        if let Some(records) = result {
            state.records = Arc::new(records);
            state.last_scan = Some(SystemTime::now());
        }
        if state.pending {
            state.pending = false;
            return true;
        }
        state.in_flight = false;
        false
    }

    pub fn is_in_flight(&self) -> bool {
        self.lock().in_flight
    }

    pub fn has_pending(&self) -> bool {
        self.lock().pending
    }

    /// 上一个成功周期的记录集
    pub fn snapshot(&self) -> Arc<Vec<Record>> {
        Arc::clone(&self.lock().records)
    }

    pub fn last_scan(&self) -> Option<SystemTime> {
        self.lock().last_scan
    }

    /// 运行一次刷新（含合并后的重跑）
    ///
    /// 若已有周期在运行，只登记重跑并返回 false。
    /// 调用方中途丢弃该 future 时，运行标志会被释放。
    pub async fn refresh<F, Fut>(&self, mut scan: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<Vec<Record>>>,
    {
        if !self.try_begin() {
            return false;
        }
        let mut guard = InFlightGuard { coordinator: self, armed: true };
        loop {
            let result = match scan().await {
                Ok(records) => Some(records),
                Err(e) => {
                    log::error!("Refresh failed, keeping previous results: {:#}", e);
                    None
                }
            };
            if !self.complete(result) {
                guard.armed = false;
                return true;
            }
            log::debug!("Running coalesced refresh");
        }
    }
}

/// 周期未正常结束（被取消或 panic）时清除运行与重跑标志
struct InFlightGuard<'a> {
    coordinator: &'a ScanCoordinator,
    armed: bool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.coordinator.lock();
        state.in_flight = false;
        state.pending = false;
        log::warn!("Refresh cancelled before completion, releasing scan slot");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProcessRecord, ProcessType};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(pid: u32) -> Record {
        Record::Process(ProcessRecord {
            pid,
            ports: vec![3000],
            kind: ProcessType::Node,
            app_name: Some("app".to_string()),
            cpu: 0.0,
            rss: 0,
            is_listening: true,
        })
    }

    #[test]
    fn test_triggers_while_busy_collapse_to_one_rerun() {
        let coordinator = ScanCoordinator::new();
        assert!(coordinator.try_begin());
        assert!(!coordinator.try_begin());
        assert!(!coordinator.try_begin());
        assert!(!coordinator.try_begin());
        assert!(coordinator.has_pending());

        // 第一次结束：需要一次重跑，仍处于运行中
        assert!(coordinator.complete(Some(vec![record(1)])));
        assert!(coordinator.is_in_flight());

        // 重跑结束：没有更多待处理
        assert!(!coordinator.complete(Some(vec![record(2)])));
        assert!(!coordinator.is_in_flight());
        assert_eq!(coordinator.snapshot()[0].pid(), Some(2));
    }

    #[test]
    fn test_failed_cycle_keeps_previous_records() {
        let coordinator = ScanCoordinator::new();
        assert!(coordinator.try_begin());
        coordinator.complete(Some(vec![record(7)]));
        let first_scan = coordinator.last_scan();
        assert!(first_scan.is_some());

        assert!(coordinator.try_begin());
        coordinator.complete(None);
        assert_eq!(coordinator.snapshot().len(), 1);
        assert_eq!(coordinator.snapshot()[0].pid(), Some(7));
        assert_eq!(coordinator.last_scan(), first_scan);
    }

    #[tokio::test]
    async fn test_refresh_runs_scan() {
        let coordinator = ScanCoordinator::new();
        let calls = AtomicUsize::new(0);
        let ran = coordinator
            .refresh(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, anyhow::Error>(vec![record(3)]) }
            })
            .await;
        assert!(ran);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_while_busy_is_coalesced() {
        let coordinator = Arc::new(ScanCoordinator::new());
        assert!(coordinator.try_begin());

        let ran = coordinator.refresh(|| async { Ok::<_, anyhow::Error>(vec![record(4)]) }).await;
        assert!(!ran);
        assert!(coordinator.has_pending());
    }

    #[tokio::test]
    async fn test_cancelled_refresh_releases_slot() {
        let coordinator = ScanCoordinator::new();
        let cancelled = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            coordinator.refresh(|| async {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                Ok::<_, anyhow::Error>(vec![record(8)])
            }),
        )
        .await;
        assert!(cancelled.is_err());
        assert!(!coordinator.is_in_flight());
        assert!(!coordinator.has_pending());
        assert!(coordinator.last_scan().is_none());

        let ran = coordinator
            .refresh(|| async { Ok::<_, anyhow::Error>(vec![record(9)]) })
            .await;
        assert!(ran);
        assert_eq!(coordinator.snapshot()[0].pid(), Some(9));
        assert!(coordinator.last_scan().is_some());
    }

    #[tokio::test]
    async fn test_refresh_error_is_contained() {
        let coordinator = ScanCoordinator::new();
        let ran = coordinator
            .refresh(|| async { Err::<Vec<Record>, _>(anyhow::anyhow!("boom")) })
            .await;
        assert!(ran);
        assert!(coordinator.snapshot().is_empty());
        assert!(!coordinator.is_in_flight());
    }
}
