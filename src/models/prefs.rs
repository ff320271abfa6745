use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

use crate::models::ProcessType;

pub const DEFAULT_REFRESH_MS: u64 = 5000;

/// 客户端可选的刷新间隔
pub const REFRESH_CHOICES: [RefreshInterval; 4] = [
    RefreshInterval::Every(1000),
    RefreshInterval::Every(5000),
    RefreshInterval::Every(10000),
    RefreshInterval::Paused,
];

/// 自动刷新间隔（毫秒），或暂停
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshInterval {
    Every(u64),
    Paused,
}

impl Default for RefreshInterval {
    fn default() -> Self {
        RefreshInterval::Every(DEFAULT_REFRESH_MS)
    }
}

impl RefreshInterval {
    /// 解析 `paused` 或正整数毫秒，非法值回退为默认值
    pub fn sanitize(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("paused") {
            return RefreshInterval::Paused;
        }
        match raw.parse::<f64>() {
            Ok(ms) if ms.is_finite() && ms >= 1.0 => RefreshInterval::Every(ms as u64),
            _ => RefreshInterval::default(),
        }
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            RefreshInterval::Every(ms) => Some(Duration::from_millis(*ms)),
            RefreshInterval::Paused => None,
        }
    }
}

impl std::fmt::Display for RefreshInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefreshInterval::Every(ms) => write!(f, "every {}ms", ms),
            RefreshInterval::Paused => f.write_str("paused"),
        }
    }
}

impl Serialize for RefreshInterval {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RefreshInterval::Every(ms) => serializer.serialize_u64(*ms),
            RefreshInterval::Paused => serializer.serialize_str("paused"),
        }
    }
}

impl<'de> Deserialize<'de> for RefreshInterval {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(f64),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Number(n) => RefreshInterval::sanitize(&n.to_string()),
            Raw::Text(s) => RefreshInterval::sanitize(&s),
        })
    }
}

/// 各进程类型的启用开关
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnabledTypes {
    #[serde(default = "default_true")]
    pub node: bool,
    #[serde(default = "default_true")]
    pub vite: bool,
    #[serde(default = "default_true")]
    pub bun: bool,
    #[serde(default = "default_true")]
    pub claude: bool,
    #[serde(default = "default_true")]
    pub docker: bool,
}

fn default_true() -> bool {
    true
}

impl Default for EnabledTypes {
    fn default() -> Self {
        Self { node: true, vite: true, bun: true, claude: true, docker: true }
    }
}

impl EnabledTypes {
    pub fn is_enabled(&self, kind: ProcessType) -> bool {
        match kind {
            ProcessType::Node => self.node,
            ProcessType::Vite => self.vite,
            ProcessType::Bun => self.bun,
            ProcessType::Claude => self.claude,
            ProcessType::Docker => self.docker,
        }
    }

    pub fn set(&mut self, kind: ProcessType, enabled: bool) {
        let slot = match kind {
            ProcessType::Node => &mut self.node,
            ProcessType::Vite => &mut self.vite,
            ProcessType::Bun => &mut self.bun,
            ProcessType::Claude => &mut self.claude,
            ProcessType::Docker => &mut self.docker,
        };
        *slot = enabled;
    }
}

/// 运行时偏好设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    #[serde(default)]
    pub refresh_ms: RefreshInterval,
    #[serde(default)]
    pub all_users: bool,
    #[serde(default)]
    pub process_types: EnabledTypes,
}

/// 偏好设置的部分更新
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesPatch {
    pub refresh_ms: Option<RefreshInterval>,
    pub all_users: Option<bool>,
    pub process_types: Option<EnabledTypes>,
}

impl Preferences {
    pub fn apply(&mut self, patch: PreferencesPatch) {
        if let Some(refresh) = patch.refresh_ms {
            self.refresh_ms = refresh;
        }
        if let Some(all_users) = patch.all_users {
            self.all_users = all_users;
        }
        if let Some(types) = patch.process_types {
            self.process_types = types;
        }
    }

    /// 在周期开始时拍下的扫描配置快照
    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            enabled: self.process_types,
            scope_to_current_user: !self.all_users,
        }
    }
}

/// 单个扫描周期使用的配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanConfig {
    pub enabled: EnabledTypes,
    pub scope_to_current_user: bool,
}
