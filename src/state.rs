use crate::metrics::METRICS;
use crate::models::{BulkReport, KillOutcome, Preferences, PreferencesPatch};
use crate::services::{Discovery, ScanCoordinator, StatsCollector, Terminator};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio::sync::Notify;

pub struct AppStateInner {
    pub prefs: RwLock<Preferences>,
    pub coordinator: ScanCoordinator,
    pub discovery: Discovery,
    pub terminator: Terminator,
    /// 唤醒调度器重新读取刷新间隔
    pub wake: Notify,
}

pub type AppState = Arc<AppStateInner>;

pub fn new_state(prefs: Preferences) -> AppState {
    let stats = Arc::new(StatsCollector::new());

    Arc::new(AppStateInner {
        prefs: RwLock::new(prefs),
        coordinator: ScanCoordinator::new(),
        discovery: Discovery::new(stats),
        terminator: Terminator::os(),
        wake: Notify::new(),
    })
}

impl AppStateInner {
    pub fn preferences(&self) -> Preferences {
        match self.prefs.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update_preferences(&self, patch: PreferencesPatch) -> Preferences {
        let mut guard = match self.prefs.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.apply(patch);
        guard.clone()
    }

    /// 触发一次（可能被合并的）发现周期
    ///
    /// 每个周期开始时重新读取偏好设置快照。
    pub async fn refresh(&self) -> bool {
        self.coordinator
            .refresh(move || {
                let config = self.preferences().scan_config();
                async move {
                    let started = Instant::now();
                    let result = self.discovery.scan(&config).await;
                    METRICS.observe_scan(started.elapsed(), result.is_ok());
                    result
                }
            })
            .await
    }

    pub fn record_outcome(&self, outcome: &KillOutcome) {
        METRICS.observe_termination(outcome);
    }

    pub fn record_report(&self, report: &BulkReport) {
        for outcome in &report.outcomes {
            METRICS.observe_termination(outcome);
        }
    }
}
