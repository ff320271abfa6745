use std::future::Future;
use tokio::sync::{watch, Notify};

use crate::models::RefreshInterval;
use crate::state::AppState;

/// 周期刷新循环
///
/// 启动时立即刷新一次；之后按当前间隔等待。暂停时只等待唤醒。
/// 唤醒只用于重新读取间隔（唤醒方已自行触发了刷新）。
pub async fn run_loop<T, Fut, I>(
    mut tick: T,
    interval: I,
    wake: &Notify,
    mut shutdown: watch::Receiver<bool>,
) where
    T: FnMut() -> Fut,
    Fut: Future<Output = ()>,
    I: Fn() -> RefreshInterval,
{
    let mut refresh_now = true;
    loop {
        if *shutdown.borrow() {
            break;
        }
        if refresh_now {
            tick().await;
        }

        refresh_now = match interval().as_duration() {
            None => tokio::select! {
                _ = wake.notified() => false,
                _ = shutdown.changed() => break,
            },
            Some(every) => tokio::select! {
                _ = tokio::time::sleep(every) => true,
                _ = wake.notified() => false,
                _ = shutdown.changed() => break,
            },
        };
    }
}

pub async fn run(state: AppState, shutdown: watch::Receiver<bool>) {
    log::info!("⏱  Scheduler started ({})", state.preferences().refresh_ms);
    let shared = &state;
    run_loop(
        move || async move {
            shared.refresh().await;
        },
        || state.preferences().refresh_ms,
        &state.wake,
        shutdown,
    )
    .await;
    log::info!("Scheduler stopped");
}
