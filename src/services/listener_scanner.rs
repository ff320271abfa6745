use anyhow::{bail, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use crate::models::{Backend, Listener};
use crate::services::command::{CommandError, CommandRunner, SystemRunner};

const FIELD_MODE_TIMEOUT: Duration = Duration::from_secs(4);
const HUMAN_MODE_TIMEOUT: Duration = Duration::from_secs(3);

lazy_static! {
    static ref FIELD_PORT: Regex = Regex::new(r":(\d+)$").unwrap();
    static ref HUMAN_PORT: Regex = Regex::new(r"TCP \S*:(\d+) \(LISTEN\)").unwrap();
    static ref NODE_COMMAND: Regex = Regex::new(r"\bnode(js)?\b").unwrap();
    static ref BUN_COMMAND: Regex = Regex::new(r"\bbun\b").unwrap();
}

/// 按 pid 聚合端口，保持首次出现的顺序
#[derive(Default)]
struct ListenerTable {
    order: Vec<u32>,
    entries: HashMap<u32, (BTreeSet<u16>, Option<String>)>,
}

impl ListenerTable {
    fn touch(&mut self, pid: u32) -> &mut (BTreeSet<u16>, Option<String>) {
        if !self.entries.contains_key(&pid) {
            self.order.push(pid);
        }
        self.entries.entry(pid).or_default()
    }

    fn into_listeners(mut self) -> Vec<Listener> {
        self.order
            .into_iter()
            .filter_map(|pid| {
                self.entries.remove(&pid).map(|(ports, user)| Listener {
                    pid,
                    ports: ports.into_iter().collect(),
                    user,
                })
            })
            .collect()
    }
}

fn parse_port(caps: Option<regex::Captures<'_>>) -> Option<u16> {
    caps.and_then(|c| c[1].parse::<u16>().ok()).filter(|p| *p > 0)
}

/// 解析 `lsof -F pcLPn` 的字段输出
///
/// 每个 `p` 字段开启一个新进程，随后的 `n` 字段（如 `*:3000`）
/// 都属于该进程。已通过 `-sTCP:LISTEN` 过滤，无需再检查状态。
pub fn parse_field_output(stdout: &str) -> Result<Vec<Listener>> {
    let mut table = ListenerTable::default();
    let mut current: Option<u32> = None;
    let mut saw_process = false;

    for line in stdout.lines() {
        let mut chars = line.chars();
        let key = match chars.next() {
            Some(k) => k,
            None => continue,
        };
        let value = chars.as_str();

        match key {
            'p' => {
                current = value.trim().parse::<u32>().ok().filter(|pid| *pid > 0);
                if let Some(pid) = current {
                    saw_process = true;
                    table.touch(pid);
                }
            }
            'L' => {
                if let Some(pid) = current {
                    if !value.is_empty() {
                        table.touch(pid).1 = Some(value.to_string());
                    }
                }
            }
            'n' => {
                if let (Some(pid), Some(port)) = (current, parse_port(FIELD_PORT.captures(value))) {
                    table.touch(pid).0.insert(port);
                }
            }
            _ => {}
        }
    }

    if !saw_process && !stdout.trim().is_empty() {
        bail!("field output contained no process records");
    }

    Ok(table.into_listeners())
}

fn command_matches(command: &str, backend: Backend) -> bool {
    match backend {
        Backend::Node => command == "node" || NODE_COMMAND.is_match(command),
        Backend::Bun => command == "bun" || BUN_COMMAND.is_match(command),
    }
}

/// 解析人类可读的 lsof 表格输出（字段模式失败时的后备）
pub fn parse_human_output(stdout: &str, backend: Backend) -> Vec<Listener> {
    let mut table = ListenerTable::default();

    for line in stdout.lines() {
        if line.is_empty() || line.starts_with("COMMAND") || !line.contains("LISTEN") {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 {
            continue;
        }

        if !command_matches(parts[0], backend) {
            continue;
        }

        let pid = match parts[1].parse::<u32>() {
            Ok(pid) if pid > 0 => pid,
            _ => continue,
        };

        let entry = table.touch(pid);
        if entry.1.is_none() {
            entry.1 = parts.get(2).map(|u| u.to_string());
        }
        if let Some(port) = parse_port(HUMAN_PORT.captures(line)) {
            entry.0.insert(port);
        }
    }

    table.into_listeners()
}

fn lsof_args(backend: Backend, uid: Option<&str>, field_mode: bool) -> Vec<String> {
    let mut args: Vec<String> = ["-nP", "-iTCP", "-sTCP:LISTEN", "-a", "-c", backend.command()]
        .iter()
        .map(|s| s.to_string())
        .collect();
    if field_mode {
        args.push("-F".to_string());
        args.push("pcLPn".to_string());
    }
    if let Some(uid) = uid {
        args.push("-u".to_string());
        args.push(uid.to_string());
    }
    args
}

fn current_uid() -> String {
    nix::unistd::getuid().as_raw().to_string()
}

async fn run_lsof<R: CommandRunner>(runner: &R, args: &[String], timeout: Duration) -> Result<String, CommandError> {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    runner.run("lsof", &args, timeout).await.map(|out| out.stdout)
}

/// 扫描某个后端所有处于 LISTEN 状态的进程
///
/// 永不返回错误：失败只会记录日志并产出空列表，
/// 单个后端失败不能中断整个发现周期。
pub async fn scan_listeners(backend: Backend, scope_to_current_user: bool) -> Vec<Listener> {
    let uid = scope_to_current_user.then(current_uid);
    scan_listeners_with(&SystemRunner, backend, uid.as_deref()).await
}

pub async fn scan_listeners_with<R: CommandRunner>(runner: &R, backend: Backend, uid: Option<&str>) -> Vec<Listener> {
    let listeners = match run_lsof(runner, &lsof_args(backend, uid, true), FIELD_MODE_TIMEOUT).await {
        Ok(stdout) => match parse_field_output(&stdout) {
            Ok(listeners) => Some(listeners),
            Err(e) => {
                log::warn!("[lsof {}] field parse failed: {}", backend, e);
                None
            }
        },
        Err(e) if e.is_no_match() => Some(Vec::new()),
        Err(e) => {
            log::debug!("[lsof {}] field mode failed, retrying: {}", backend, e);
            None
        }
    };

    let listeners = match listeners {
        Some(listeners) => listeners,
        None => match run_lsof(runner, &lsof_args(backend, uid, false), HUMAN_MODE_TIMEOUT).await {
            Ok(stdout) => parse_human_output(&stdout, backend),
            Err(e) if e.is_no_match() => Vec::new(),
            Err(e) => {
                log::debug!("[lsof {}] error: {}", backend, e);
                Vec::new()
            }
        },
    };

    for listener in &listeners {
        log::debug!(
            "[lsof {}] pid {} user {} ports {:?}",
            backend,
            listener.pid,
            listener.user.as_deref().unwrap_or("?"),
            listener.ports
        );
    }
    listeners
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::command::{exit_code, stdout, FnRunner};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const FIELD_OUTPUT: &str = "p4242\ncnode\nLalice\nf21\nPTCP\nn*:3001\nf22\nPTCP\nn127.0.0.1:3000\nf23\nPTCP\nn[::1]:3000\np5150\ncnode\nLalice\nf19\nPTCP\nn*:5173\n";

    const HUMAN_OUTPUT: &str = "\
COMMAND   PID  USER   FD   TYPE             DEVICE SIZE/OFF NODE NAME
node     4242 alice   21u  IPv6 0x1234567890abcdef      0t0  TCP *:3001 (LISTEN)
node     4242 alice   22u  IPv4 0x1234567890abcdf0      0t0  TCP 127.0.0.1:3000 (LISTEN)
node     4242 alice   23u  IPv4 0x1234567890abcdf1      0t0  TCP 127.0.0.1:3000->127.0.0.1:50123 (ESTABLISHED)
nodemon  7777 alice   20u  IPv4 0x1234567890abcdf2      0t0  TCP *:9229 (LISTEN)
python3  8080 alice   20u  IPv4 0x1234567890abcdf3      0t0  TCP *:8000 (LISTEN)
";

    #[test]
    fn test_field_mode_accumulates_ports() {
        let listeners = parse_field_output(FIELD_OUTPUT).unwrap();
        assert_eq!(listeners.len(), 2);
        assert_eq!(listeners[0].pid, 4242);
        assert_eq!(listeners[0].ports, vec![3000, 3001]);
        assert_eq!(listeners[0].user.as_deref(), Some("alice"));
        assert_eq!(listeners[1].pid, 5150);
        assert_eq!(listeners[1].ports, vec![5173]);
    }

    #[test]
    fn test_human_mode_accumulates_ports() {
        let listeners = parse_human_output(HUMAN_OUTPUT, Backend::Node);
        assert_eq!(listeners.len(), 1);
        assert_eq!(listeners[0].pid, 4242);
        assert_eq!(listeners[0].ports, vec![3000, 3001]);
        assert_eq!(listeners[0].user.as_deref(), Some("alice"));
    }

    #[test]
    fn test_human_mode_filters_backend() {
        let output = "COMMAND PID USER FD TYPE DEVICE SIZE/OFF NODE NAME\n\
                      bun 900 bob 12u IPv4 0x1 0t0 TCP *:4000 (LISTEN)\n\
                      node 901 bob 12u IPv4 0x2 0t0 TCP *:4001 (LISTEN)\n";
        let bun = parse_human_output(output, Backend::Bun);
        assert_eq!(bun.len(), 1);
        assert_eq!(bun[0].pid, 900);
        assert_eq!(bun[0].ports, vec![4000]);
    }

    #[test]
    fn test_human_mode_skips_bad_pid() {
        let output = "node abc alice 21u IPv4 0x1 0t0 TCP *:3000 (LISTEN)\n";
        assert!(parse_human_output(output, Backend::Node).is_empty());
    }

    #[test]
    fn test_field_mode_empty_output() {
        assert!(parse_field_output("").unwrap().is_empty());
    }

    #[test]
    fn test_field_mode_rejects_garbage() {
        assert!(parse_field_output("COMMAND PID USER\nnode 1 alice\n").is_err());
    }

    #[test]
    fn test_field_mode_ignores_ports_without_pid() {
        let listeners = parse_field_output("pnotapid\nn*:3000\np12\nn*:8080\n").unwrap();
        assert_eq!(listeners.len(), 1);
        assert_eq!(listeners[0].ports, vec![8080]);
    }

    #[tokio::test]
    async fn test_no_match_exit_is_empty_without_fallback() {
        let calls = AtomicUsize::new(0);
        let runner = FnRunner(|_: &str, _: &[&str]| {
            calls.fetch_add(1, Ordering::SeqCst);
            exit_code("lsof", 1)
        });
        assert!(scan_listeners_with(&runner, Backend::Node, Some("501")).await.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_field_mode_failure_falls_back_to_human() {
        let runner = FnRunner(|_: &str, args: &[&str]| {
            if args.contains(&"-F") {
                exit_code("lsof", 2)
            } else {
                stdout(HUMAN_OUTPUT)
            }
        });
        let listeners = scan_listeners_with(&runner, Backend::Node, None).await;
        assert_eq!(listeners.len(), 1);
        assert_eq!(listeners[0].ports, vec![3000, 3001]);
    }

    #[tokio::test]
    async fn test_field_parse_error_falls_back_to_human() {
        let runner = FnRunner(|_: &str, args: &[&str]| {
            if args.contains(&"-F") {
                stdout("COMMAND PID USER\nnode 1 alice\n")
            } else {
                stdout(HUMAN_OUTPUT)
            }
        });
        let listeners = scan_listeners_with(&runner, Backend::Node, None).await;
        assert_eq!(listeners[0].pid, 4242);
    }

    #[tokio::test]
    async fn test_both_modes_failing_yield_empty() {
        let runner = FnRunner(|_: &str, _: &[&str]| exit_code("lsof", 2));
        assert!(scan_listeners_with(&runner, Backend::Bun, None).await.is_empty());
    }

    #[tokio::test]
    async fn test_field_mode_success_skips_human() {
        let runner = FnRunner(|_: &str, args: &[&str]| {
            assert!(args.contains(&"-F"), "human mode should not run");
            stdout(FIELD_OUTPUT)
        });
        let listeners = scan_listeners_with(&runner, Backend::Node, None).await;
        assert_eq!(listeners.len(), 2);
    }

    #[test]
    fn test_lsof_args_scoped() {
        let args = lsof_args(Backend::Bun, Some("501"), true);
        assert_eq!(
            args,
            vec!["-nP", "-iTCP", "-sTCP:LISTEN", "-a", "-c", "bun", "-F", "pcLPn", "-u", "501"]
        );
        let human = lsof_args(Backend::Node, None, false);
        assert!(!human.contains(&"-F".to_string()));
        assert!(!human.contains(&"-u".to_string()));
    }
}
