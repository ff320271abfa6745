use serde::Serialize;
use std::fmt;

/// 终止流程中的升级步骤
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum KillStep {
    #[serde(rename = "SIGTERM")]
    Graceful,
    #[serde(rename = "SIGKILL")]
    Forceful,
    #[serde(rename = "docker stop")]
    ContainerStop,
}

impl fmt::Display for KillStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KillStep::Graceful => "SIGTERM",
            KillStep::Forceful => "SIGKILL",
            KillStep::ContainerStop => "docker stop",
        };
        f.write_str(s)
    }
}

/// 终止目标
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum KillTarget {
    Pid {
        pid: u32,
    },
    Container {
        #[serde(rename = "containerId")]
        container_id: String,
        #[serde(rename = "containerName")]
        container_name: String,
    },
}

impl KillTarget {
    pub fn label(&self) -> String {
        match self {
            KillTarget::Pid { pid } => pid.to_string(),
            KillTarget::Container { container_id, .. } => container_id.clone(),
        }
    }
}

/// 单个目标的终止结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KillOutcome {
    #[serde(flatten)]
    pub target: KillTarget,
    pub ok: bool,
    pub step: KillStep,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl KillOutcome {
    pub fn success(target: KillTarget, step: KillStep) -> Self {
        Self { target, ok: true, step, error: None }
    }

    pub fn failure(target: KillTarget, step: KillStep, error: impl Into<String>) -> Self {
        Self { target, ok: false, step, error: Some(error.into()) }
    }

    /// 通知文案
    pub fn summary(&self) -> String {
        let error = self.error.as_deref().unwrap_or("");
        match (&self.target, self.ok) {
            (KillTarget::Pid { pid }, true) => {
                format!("Process terminated: PID {} ({})", pid, self.step)
            }
            (KillTarget::Pid { pid }, false) => {
                format!("Could not terminate PID {} - {} - {}", pid, self.step, error)
            }
            (KillTarget::Container { container_id, container_name }, true) => {
                format!("Container stopped: {} ({})", container_name, container_id)
            }
            (KillTarget::Container { container_name, .. }, false) => {
                format!("Could not stop container {} - {}", container_name, error)
            }
        }
    }
}

/// 批量终止的范围
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "scope", content = "name")]
pub enum BulkScope {
    Group(String),
    All,
}

/// 批量终止汇总
#[derive(Debug, Clone, Serialize)]
pub struct BulkReport {
    pub scope: BulkScope,
    pub succeeded: usize,
    pub failed: usize,
    pub outcomes: Vec<KillOutcome>,
}

impl BulkReport {
    pub fn new(scope: BulkScope, outcomes: Vec<KillOutcome>) -> Self {
        let succeeded = outcomes.iter().filter(|o| o.ok).count();
        let failed = outcomes.len() - succeeded;
        Self { scope, succeeded, failed, outcomes }
    }

    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    pub fn failures(&self) -> impl Iterator<Item = &KillOutcome> {
        self.outcomes.iter().filter(|o| !o.ok)
    }

    pub fn summary(&self) -> String {
        match (&self.scope, self.failed) {
            (BulkScope::Group(name), 0) => {
                format!("{} {} processes terminated.", self.succeeded, name)
            }
            (BulkScope::Group(_), failed) => {
                format!("{} succeeded, {} failed.", self.succeeded, failed)
            }
            (BulkScope::All, 0) => format!("{} processes terminated.", self.succeeded),
            (BulkScope::All, failed) => {
                let detail = self
                    .failures()
                    .map(|o| format!("{} ({})", o.target.label(), o.step))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{} succeeded, {} failed - {}", self.succeeded, failed, detail)
            }
        }
    }
}
