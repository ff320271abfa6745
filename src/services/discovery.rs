use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;

use crate::models::{Backend, EnabledTypes, Listener, ProcessRecord, ProcessStats, ProcessType, Record, ScanConfig};
use crate::services::classifier::{classify, looks_like_claude, needed_backends};
use crate::services::container_scanner::scan_containers;
use crate::services::listener_scanner::scan_listeners;
use crate::services::project_resolver::resolve_app_name;
use crate::services::stats_collector::StatsCollector;

/// 已分类、待补充项目名的监听进程
#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    pub listener: Listener,
    pub kind: ProcessType,
    pub stats: ProcessStats,
}

/// 合并各后端的扫描结果，按 pid 去重（先出现的后端优先）
pub fn merge_listeners(scans: Vec<(Backend, Vec<Listener>)>) -> Vec<(Backend, Listener)> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for (backend, listeners) in scans {
        for listener in listeners {
            if seen.insert(listener.pid) {
                merged.push((backend, listener));
            }
        }
    }
    merged
}

/// 用批量获取的命令行分类，并丢弃未启用的类型
pub fn classify_listeners(
    raw: Vec<(Backend, Listener)>,
    stats: &HashMap<u32, ProcessStats>,
    enabled: &EnabledTypes,
) -> Vec<Classified> {
    raw.into_iter()
        .filter_map(|(backend, listener)| {
            let stats = stats.get(&listener.pid).cloned().unwrap_or_default();
            let kind = classify(&stats.command_line, backend)?;
            if !enabled.is_enabled(kind) {
                return None;
            }
            Some(Classified { listener, kind, stats })
        })
        .collect()
}

/// 从完整进程表中挑出未监听端口的 Claude 会话
pub fn select_claude_sessions(table: &[(u32, String)], seen: &HashSet<u32>, own_pid: u32) -> Vec<u32> {
    let mut pids: Vec<u32> = table
        .iter()
        .filter(|(pid, _)| *pid != own_pid && !seen.contains(pid))
        .filter(|(_, cmd)| looks_like_claude(cmd))
        .map(|(pid, _)| *pid)
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

/// 收集各后端的扫描任务；崩溃的任务只丢弃该后端
pub async fn join_backend_scans(mut tasks: JoinSet<(Backend, Vec<Listener>)>) -> Vec<(Backend, Vec<Listener>)> {
    let mut scans = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(scan) => scans.push(scan),
            Err(e) => log::warn!("Listener scan task failed, skipping backend: {}", e),
        }
    }
    scans.sort_by_key(|(backend, _)| *backend);
    scans
}

pub struct Discovery {
    stats: Arc<StatsCollector>,
    home: Option<PathBuf>,
    own_pid: u32,
}

impl Discovery {
    pub fn new(stats: Arc<StatsCollector>) -> Self {
        Self {
            stats,
            home: dirs::home_dir(),
            own_pid: std::process::id(),
        }
    }

    /// 每个后端并发扫描一次（绝不按类型重复扫描），结果按后端顺序合并
    async fn scan_backends(&self, config: &ScanConfig) -> Vec<(Backend, Vec<Listener>)> {
        let scoped = config.scope_to_current_user;
        let mut tasks = JoinSet::new();
        for backend in needed_backends(&config.enabled) {
            tasks.spawn(async move { (backend, scan_listeners(backend, scoped).await) });
        }
        join_backend_scans(tasks).await
    }

    /// 并行解析每个 pid 的项目名，保持输入顺序
    async fn resolve_names(&self, pids: &[u32]) -> Vec<Option<String>> {
        let mut tasks = JoinSet::new();
        for (index, pid) in pids.iter().copied().enumerate() {
            let stats = Arc::clone(&self.stats);
            let home = self.home.clone();
            tasks.spawn(async move {
                let name = match stats.working_dir(pid).await {
                    Some(cwd) => tokio::task::spawn_blocking(move || resolve_app_name(&cwd, home.as_deref()))
                        .await
                        .unwrap_or(None),
                    None => None,
                };
                (index, name)
            });
        }

        let mut names = vec![None; pids.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, name)) => names[index] = name,
                Err(e) => log::warn!("Project name task failed: {}", e),
            }
        }
        names
    }

    /// 完整的发现周期
    pub async fn scan(&self, config: &ScanConfig) -> Result<Vec<Record>> {
        let started = Instant::now();

        let raw = merge_listeners(self.scan_backends(config).await);
        let seen: HashSet<u32> = raw.iter().map(|(_, l)| l.pid).collect();
        let pids: Vec<u32> = raw.iter().map(|(_, l)| l.pid).collect();

        // 统计必须等到完整的去重 pid 集合
        let stats = self.stats.batch_stats(&pids).await;
        let classified = classify_listeners(raw, &stats, &config.enabled);

        let classified_pids: Vec<u32> = classified.iter().map(|c| c.listener.pid).collect();
        let names = self.resolve_names(&classified_pids).await;

        let mut records: Vec<Record> = classified
            .into_iter()
            .zip(names)
            .map(|(c, name)| {
                Record::Process(ProcessRecord {
                    pid: c.listener.pid,
                    ports: c.listener.ports,
                    kind: c.kind,
                    app_name: Some(name.unwrap_or_else(|| c.kind.label().to_string())),
                    cpu: c.stats.cpu_usage,
                    rss: c.stats.rss_kb,
                    is_listening: true,
                })
            })
            .collect();

        if config.enabled.claude {
            let table = self.stats.command_lines().await;
            let sessions = select_claude_sessions(&table, &seen, self.own_pid);
            if !sessions.is_empty() {
                let session_stats = self.stats.batch_stats(&sessions).await;
                let names = self.resolve_names(&sessions).await;
                for (pid, name) in sessions.into_iter().zip(names) {
                    let stat = session_stats.get(&pid).cloned().unwrap_or_default();
                    records.push(Record::Process(ProcessRecord {
                        pid,
                        ports: Vec::new(),
                        kind: ProcessType::Claude,
                        app_name: name,
                        cpu: stat.cpu_usage,
                        rss: stat.rss_kb,
                        is_listening: false,
                    }));
                }
            }
        }

        if config.enabled.docker {
            records.extend(scan_containers().await.into_iter().map(Record::from));
        }

        log::debug!(
            "Discovery found {} records in {:?}",
            records.len(),
            started.elapsed()
        );
        Ok(records)
    }
}
