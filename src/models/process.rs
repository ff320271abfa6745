use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// 进程类型（互斥分类）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessType {
    Node,
    Vite,
    Bun,
    Claude,
    Docker,
}

impl ProcessType {
    pub const ALL: [ProcessType; 5] = [
        ProcessType::Node,
        ProcessType::Vite,
        ProcessType::Bun,
        ProcessType::Claude,
        ProcessType::Docker,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ProcessType::Node => "node",
            ProcessType::Vite => "vite",
            ProcessType::Bun => "bun",
            ProcessType::Claude => "claude",
            ProcessType::Docker => "docker",
        }
    }
}

impl fmt::Display for ProcessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ProcessType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProcessType::ALL
            .iter()
            .copied()
            .find(|t| t.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown process type '{}'", s))
    }
}

/// 用于枚举候选进程的可执行文件名
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Node,
    Bun,
}

impl Backend {
    /// lsof `-c` 过滤用的命令名
    pub fn command(&self) -> &'static str {
        match self {
            Backend::Node => "node",
            Backend::Bun => "bun",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command())
    }
}

/// 端口扫描得到的原始监听记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listener {
    pub pid: u32,
    /// 升序且去重
    pub ports: Vec<u16>,
    pub user: Option<String>,
}

/// 被识别为开发工具的宿主进程
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRecord {
    pub pid: u32,
    pub ports: Vec<u16>,
    #[serde(rename = "type")]
    pub kind: ProcessType,
    pub app_name: Option<String>,
    pub cpu: f32,
    /// 常驻内存 (KB)
    pub rss: u64,
    pub is_listening: bool,
}

/// 被视为开发工具的运行中容器
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerRecord {
    pub container_id: String,
    pub container_name: String,
    pub ports: Vec<u16>,
    pub app_name: String,
    pub cpu: f32,
    /// 内存 (KB)
    pub rss: u64,
}

/// 容器记录与进程记录同形：`type` 固定为 docker，`pid` 为 null
impl Serialize for ContainerRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Wire<'a> {
            pid: Option<u32>,
            container_id: &'a str,
            container_name: &'a str,
            ports: &'a [u16],
            #[serde(rename = "type")]
            kind: ProcessType,
            app_name: &'a str,
            cpu: f32,
            rss: u64,
            is_listening: bool,
        }

        Wire {
            pid: None,
            container_id: &self.container_id,
            container_name: &self.container_name,
            ports: &self.ports,
            kind: ProcessType::Docker,
            app_name: &self.app_name,
            cpu: self.cpu,
            rss: self.rss,
            is_listening: true,
        }
        .serialize(serializer)
    }
}

/// 单次扫描周期产出的记录
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Record {
    Process(ProcessRecord),
    Container(ContainerRecord),
}

impl Record {
    pub fn kind(&self) -> ProcessType {
        match self {
            Record::Process(p) => p.kind,
            Record::Container(_) => ProcessType::Docker,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        match self {
            Record::Process(p) => Some(p.pid),
            Record::Container(_) => None,
        }
    }

    pub fn container_id(&self) -> Option<&str> {
        match self {
            Record::Process(_) => None,
            Record::Container(c) => Some(&c.container_id),
        }
    }

    pub fn app_name(&self) -> Option<&str> {
        match self {
            Record::Process(p) => p.app_name.as_deref(),
            Record::Container(c) => Some(&c.app_name),
        }
    }

    pub fn ports(&self) -> &[u16] {
        match self {
            Record::Process(p) => &p.ports,
            Record::Container(c) => &c.ports,
        }
    }

    pub fn cpu(&self) -> f32 {
        match self {
            Record::Process(p) => p.cpu,
            Record::Container(c) => c.cpu,
        }
    }

    pub fn rss(&self) -> u64 {
        match self {
            Record::Process(p) => p.rss,
            Record::Container(c) => c.rss,
        }
    }

    /// 记录身份：pid 或容器 id
    pub fn identity(&self) -> String {
        match self {
            Record::Process(p) => p.pid.to_string(),
            Record::Container(c) => c.container_id.clone(),
        }
    }
}

impl From<ProcessRecord> for Record {
    fn from(p: ProcessRecord) -> Self {
        Record::Process(p)
    }
}

impl From<ContainerRecord> for Record {
    fn from(c: ContainerRecord) -> Self {
        Record::Container(c)
    }
}
