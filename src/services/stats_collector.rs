use crate::models::ProcessStats;
use crate::services::command;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

const PS_TIMEOUT: Duration = Duration::from_secs(4);
const PROCESS_TABLE_TIMEOUT: Duration = Duration::from_secs(4);
const CWD_TIMEOUT: Duration = Duration::from_secs(2);

lazy_static! {
    static ref PS_LINE: Regex = Regex::new(r"^(\d+)\s+([\d.]+)\s+(\d+)\s+(.*)$").unwrap();
}

/// 解析 `ps -o pid=,%cpu=,rss=,command=` 的输出
pub fn parse_ps_output(stdout: &str) -> HashMap<u32, ProcessStats> {
    let mut stats = HashMap::new();
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let caps = match PS_LINE.captures(line) {
            Some(c) => c,
            None => continue,
        };
        let pid = match caps[1].parse::<u32>() {
            Ok(p) => p,
            Err(_) => continue,
        };
        stats.insert(
            pid,
            ProcessStats {
                cpu_usage: caps[2].parse().unwrap_or(0.0),
                rss_kb: caps[3].parse().unwrap_or(0),
                command_line: caps[4].to_string(),
            },
        );
    }
    stats
}

/// 解析 `lsof -a -d cwd -p <pid> -Fn` 的输出
pub fn parse_cwd_output(stdout: &str) -> Option<PathBuf> {
    stdout
        .lines()
        .find(|l| l.starts_with('n') && l.len() > 1)
        .map(|l| PathBuf::from(&l[1..]))
}

pub struct StatsCollector {
    system: Mutex<System>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    /// 一次 ps 调用批量获取 CPU、RSS 与命令行
    ///
    /// 失败时返回空表，调用方把缺失项当作零值处理。
    pub async fn batch_stats(&self, pids: &[u32]) -> HashMap<u32, ProcessStats> {
        if pids.is_empty() {
            return HashMap::new();
        }
        let pid_list = pids
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(",");

        match command::run("ps", &["-p", &pid_list, "-o", "pid=,%cpu=,rss=,command="], PS_TIMEOUT).await {
            Ok(out) => parse_ps_output(&out.stdout),
            // 部分 pid 已退出时 ps 返回非零，但仍输出存活的部分
            Err(e) => match e.partial_stdout() {
                Some(stdout) => parse_ps_output(stdout),
                None => {
                    log::debug!("[ps] batch stats failed: {}", e);
                    HashMap::new()
                }
            },
        }
    }

    fn read_command_lines(&self) -> Vec<(u32, String)> {
        let mut sys = match self.system.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
        );

        sys.processes()
            .iter()
            .map(|(pid, process)| {
                let cmd = process
                    .cmd()
                    .iter()
                    .map(|s| s.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join(" ");
                (pid.as_u32(), cmd)
            })
            .filter(|(_, cmd)| !cmd.is_empty())
            .collect()
    }

    /// 遍历完整进程表，返回 (pid, 命令行)
    pub async fn command_lines(self: &Arc<Self>) -> Vec<(u32, String)> {
        let this = Arc::clone(self);
        let task = tokio::task::spawn_blocking(move || this.read_command_lines());
        match tokio::time::timeout(PROCESS_TABLE_TIMEOUT, task).await {
            Ok(Ok(lines)) => lines,
            Ok(Err(e)) => {
                log::warn!("[process table] scan task failed: {}", e);
                Vec::new()
            }
            Err(_) => {
                log::warn!("[process table] scan timed out after {:?}", PROCESS_TABLE_TIMEOUT);
                Vec::new()
            }
        }
    }

    fn native_working_dir(&self, pid: u32) -> Option<PathBuf> {
        let mut sys = match self.system.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let pid = Pid::from_u32(pid);
        sys.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            false,
            ProcessRefreshKind::nothing().with_cwd(UpdateKind::Always),
        );
        sys.process(pid)
            .and_then(|p| p.cwd())
            .filter(|cwd| !cwd.as_os_str().is_empty())
            .map(|cwd| cwd.to_path_buf())
    }

    /// 查询进程的工作目录：先查原生进程表，再回退到 lsof
    pub async fn working_dir(self: &Arc<Self>, pid: u32) -> Option<PathBuf> {
        let this = Arc::clone(self);
        let native = tokio::task::spawn_blocking(move || this.native_working_dir(pid));
        if let Ok(Ok(Some(cwd))) = tokio::time::timeout(CWD_TIMEOUT, native).await {
            return Some(cwd);
        }

        let pid_arg = pid.to_string();
        command::run_or_default(
            "lsof cwd",
            "lsof",
            &["-a", "-d", "cwd", "-p", &pid_arg, "-Fn"],
            CWD_TIMEOUT,
            parse_cwd_output,
        )
        .await
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}
