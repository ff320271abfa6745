use lazy_static::lazy_static;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use regex::Regex;
use std::time::Duration;

use crate::models::{BulkReport, BulkScope, KillOutcome, KillStep, KillTarget, Record};
use crate::services::command;

const DOCKER_STOP_TIMEOUT: Duration = Duration::from_secs(15);

lazy_static! {
    static ref CONTAINER_ID: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").unwrap();
}

/// 存活探测结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Dead,
}

/// 零信号探测的结果映射
///
/// EPERM 表示进程存在但无权确认其死亡，按存活处理。
pub fn liveness_from(result: Result<(), Errno>) -> Liveness {
    match result {
        Ok(()) => Liveness::Alive,
        Err(Errno::EPERM) => Liveness::Alive,
        Err(_) => Liveness::Dead,
    }
}

/// 信号发送与存活探测的接缝
pub trait ProcessControl: Send + Sync {
    fn signal(&self, pid: u32, signal: Signal) -> Result<(), Errno>;
    fn probe(&self, pid: u32) -> Liveness;
}

pub struct OsProcessControl;

impl ProcessControl for OsProcessControl {
    fn signal(&self, pid: u32, sig: Signal) -> Result<(), Errno> {
        signal::kill(Pid::from_raw(pid as i32), sig)
    }

    fn probe(&self, pid: u32) -> Liveness {
        liveness_from(signal::kill(Pid::from_raw(pid as i32), None))
    }
}

/// 两段宽限期
#[derive(Debug, Clone, Copy)]
pub struct KillPolicy {
    pub graceful_wait: Duration,
    pub forceful_wait: Duration,
}

impl Default for KillPolicy {
    fn default() -> Self {
        Self {
            graceful_wait: Duration::from_millis(500),
            forceful_wait: Duration::from_millis(300),
        }
    }
}

/// 逐级升级的终止状态机
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KillState {
    Pending,
    GracefulSent,
    ForcefulSent,
    Finished(KillOutcome),
}

/// 一次状态转移：下一个状态，以及进入它之前需要等待的时长
#[derive(Debug)]
pub struct Transition {
    pub next: KillState,
    pub wait: Option<Duration>,
}

impl Transition {
    fn to(next: KillState, wait: Duration) -> Self {
        Self { next, wait: Some(wait) }
    }

    fn finish(outcome: KillOutcome) -> Self {
        Self { next: KillState::Finished(outcome), wait: None }
    }
}

impl KillState {
    pub fn advance(self, pid: u32, control: &dyn ProcessControl, policy: &KillPolicy) -> Transition {
        let target = KillTarget::Pid { pid };
        match self {
            KillState::Pending => match control.signal(pid, Signal::SIGTERM) {
                Ok(()) => Transition::to(KillState::GracefulSent, policy.graceful_wait),
                // 进程已不存在，视为在第一步即已终止
                Err(Errno::ESRCH) => Transition::finish(KillOutcome::success(target, KillStep::Graceful)),
                Err(e) => Transition::finish(KillOutcome::failure(target, KillStep::Graceful, e.desc())),
            },
            KillState::GracefulSent => {
                if control.probe(pid) == Liveness::Dead {
                    return Transition::finish(KillOutcome::success(target, KillStep::Graceful));
                }
                match control.signal(pid, Signal::SIGKILL) {
                    Ok(()) => Transition::to(KillState::ForcefulSent, policy.forceful_wait),
                    Err(Errno::ESRCH) => Transition::finish(KillOutcome::success(target, KillStep::Forceful)),
                    Err(e) => Transition::finish(KillOutcome::failure(target, KillStep::Forceful, e.desc())),
                }
            }
            KillState::ForcefulSent => {
                if control.probe(pid) == Liveness::Dead {
                    Transition::finish(KillOutcome::success(target, KillStep::Forceful))
                } else {
                    Transition::finish(KillOutcome::failure(
                        target,
                        KillStep::Forceful,
                        "Process still alive after SIGKILL",
                    ))
                }
            }
            finished @ KillState::Finished(_) => Transition { next: finished, wait: None },
        }
    }
}

pub fn is_valid_pid(pid: u32) -> bool {
    pid > 0 && pid <= i32::MAX as u32
}

pub fn is_valid_container_id(id: &str) -> bool {
    CONTAINER_ID.is_match(id)
}

pub struct Terminator<C: ProcessControl = OsProcessControl> {
    control: C,
    policy: KillPolicy,
}

impl Terminator<OsProcessControl> {
    pub fn os() -> Self {
        Self::new(OsProcessControl, KillPolicy::default())
    }
}

impl<C: ProcessControl> Terminator<C> {
    pub fn new(control: C, policy: KillPolicy) -> Self {
        Self { control, policy }
    }

    /// SIGTERM -> 等待 -> SIGKILL -> 等待，每一步后确认存活状态
    pub async fn kill_pid(&self, pid: u32) -> KillOutcome {
        if !is_valid_pid(pid) {
            return KillOutcome::failure(KillTarget::Pid { pid }, KillStep::Graceful, "invalid pid");
        }

        let mut state = KillState::Pending;
        loop {
            if let KillState::Finished(outcome) = state {
                if outcome.ok {
                    log::info!("✓ PID {} terminated ({})", pid, outcome.step);
                } else {
                    log::warn!("✗ PID {} survived {}: {:?}", pid, outcome.step, outcome.error);
                }
                return outcome;
            }
            let transition = state.advance(pid, &self.control, &self.policy);
            if let Some(wait) = transition.wait {
                tokio::time::sleep(wait).await;
            }
            state = transition.next;
        }
    }

    /// `docker stop`，结果完全取决于命令的退出状态
    pub async fn stop_container(&self, container_id: &str, container_name: &str) -> KillOutcome {
        let target = KillTarget::Container {
            container_id: container_id.to_string(),
            container_name: container_name.to_string(),
        };
        if !is_valid_container_id(container_id) {
            return KillOutcome::failure(target, KillStep::ContainerStop, "invalid container id");
        }

        match command::run("docker", &["stop", container_id], DOCKER_STOP_TIMEOUT).await {
            Ok(_) => {
                log::info!("✓ Container {} ({}) stopped", container_name, container_id);
                KillOutcome::success(target, KillStep::ContainerStop)
            }
            Err(e) => {
                log::warn!("✗ Could not stop container {}: {}", container_id, e);
                KillOutcome::failure(target, KillStep::ContainerStop, e.to_string())
            }
        }
    }

    pub async fn kill_record(&self, record: &Record) -> KillOutcome {
        match record {
            Record::Process(p) => self.kill_pid(p.pid).await,
            Record::Container(c) => self.stop_container(&c.container_id, &c.container_name).await,
        }
    }

    /// 逐个终止，不因失败提前退出
    pub async fn kill_many(&self, records: &[Record], scope: BulkScope) -> BulkReport {
        let mut outcomes = Vec::with_capacity(records.len());
        for record in records {
            outcomes.push(self.kill_record(record).await);
        }
        let report = BulkReport::new(scope, outcomes);
        log::info!(
            "Bulk kill finished: {} succeeded, {} failed",
            report.succeeded,
            report.failed
        );
        report
    }
}
