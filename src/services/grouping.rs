use serde::Serialize;
use std::collections::HashMap;

use crate::models::{ProcessType, Record};

/// 无项目名的 Claude 会话统一归入的分组
pub const CLAUDE_FALLBACK_GROUP: &str = "Claude Code";

/// KB 数的人类可读形式
pub fn format_memory(rss_kb: u64) -> String {
    if rss_kb >= 1_048_576 {
        format!("{:.1}GB", rss_kb as f64 / 1_048_576.0)
    } else if rss_kb >= 1024 {
        format!("{}MB", (rss_kb as f64 / 1024.0).round() as u64)
    } else {
        format!("{}KB", rss_kb)
    }
}

pub fn group_key(record: &Record) -> String {
    match record.app_name() {
        Some(name) => name.to_string(),
        None if record.kind() == ProcessType::Claude => CLAUDE_FALLBACK_GROUP.to_string(),
        None => record.kind().label().to_string(),
    }
}

/// 单条记录的展示文案
pub fn record_label(record: &Record) -> String {
    let ports = record.ports();
    let port_label = if ports.is_empty() {
        String::new()
    } else {
        let joined = ports.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(", :");
        format!(" :{}", joined)
    };
    let usage = format!("{:.0}% CPU, {}", record.cpu(), format_memory(record.rss()));

    match record {
        Record::Container(c) => format!("{}{} - {}", c.container_name, port_label, usage),
        Record::Process(p) => {
            let pid_label = if port_label.is_empty() {
                format!(" (pid {})", p.pid)
            } else {
                String::new()
            };
            format!("{}{}{} - {}", p.kind, port_label, pid_label, usage)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMember {
    pub label: String,
    #[serde(flatten)]
    pub record: Record,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessGroup {
    pub name: String,
    pub total_rss: u64,
    pub has_docker: bool,
    pub has_claude: bool,
    pub label: String,
    pub members: Vec<GroupMember>,
}

impl ProcessGroup {
    fn build(name: String, records: Vec<Record>) -> Self {
        let total_rss = records.iter().map(Record::rss).sum();
        let has_docker = records.iter().any(|r| r.kind() == ProcessType::Docker);
        let has_claude = records.iter().any(|r| r.kind() == ProcessType::Claude);
        let noun = if records.len() == 1 { "proc" } else { "procs" };
        let label = format!("{} - {} {}, {}", name, records.len(), noun, format_memory(total_rss));
        let members = records
            .into_iter()
            .map(|record| GroupMember { label: record_label(&record), record })
            .collect();
        Self { name, total_rss, has_docker, has_claude, label, members }
    }

    pub fn records(&self) -> Vec<Record> {
        self.members.iter().map(|m| m.record.clone()).collect()
    }
}

/// 按项目分组；组名不区分大小写排序，Claude 兜底组排最后
pub fn group_records(records: &[Record]) -> Vec<ProcessGroup> {
    let mut order: Vec<String> = Vec::new();
    let mut buckets: HashMap<String, Vec<Record>> = HashMap::new();
    for record in records {
        let key = group_key(record);
        if !buckets.contains_key(&key) {
            order.push(key.clone());
        }
        buckets.entry(key).or_default().push(record.clone());
    }

    order.sort_by(|a, b| {
        let a_fallback = a == CLAUDE_FALLBACK_GROUP;
        let b_fallback = b == CLAUDE_FALLBACK_GROUP;
        a_fallback
            .cmp(&b_fallback)
            .then_with(|| a.to_lowercase().cmp(&b.to_lowercase()))
            .then_with(|| a.cmp(b))
    });

    order
        .into_iter()
        .filter_map(|key| buckets.remove(&key).map(|members| ProcessGroup::build(key, members)))
        .collect()
}

pub fn find_group(records: &[Record], name: &str) -> Option<ProcessGroup> {
    group_records(records).into_iter().find(|g| g.name == name)
}
