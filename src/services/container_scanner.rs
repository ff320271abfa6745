use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::models::ContainerRecord;
use crate::services::command::{self, CommandRunner, SystemRunner};
use crate::services::project_resolver::find_project_name;

const DOCKER_TIMEOUT: Duration = Duration::from_secs(4);
const SHORT_ID_LEN: usize = 12;

const COMPOSE_WORKING_DIR: &str = "com.docker.compose.project.working_dir";
const COMPOSE_SERVICE: &str = "com.docker.compose.service";

lazy_static! {
    static ref PUBLISHED_PORT: Regex = Regex::new(r"(?:\d+\.\d+\.\d+\.\d+:)?(\d+)->").unwrap();
    static ref MEM_USAGE: Regex = Regex::new(r"(?i)([\d.]+)\s*(KiB|MiB|GiB|TiB|B)").unwrap();
}

/// `docker ps --format '{{json .}}'` 的单行
#[derive(Debug, Clone, Deserialize)]
pub struct PsEntry {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Names", default)]
    pub names: String,
    #[serde(rename = "Ports", default)]
    pub ports: String,
}

#[derive(Debug, Clone, Deserialize)]
struct InspectEntry {
    #[serde(rename = "Id", default)]
    id: String,
    #[serde(rename = "Config", default)]
    config: Option<InspectConfig>,
}

#[derive(Debug, Clone, Deserialize)]
struct InspectConfig {
    #[serde(rename = "Labels", default)]
    labels: Option<HashMap<String, String>>,
}

/// `docker stats --no-stream --format '{{json .}}'` 的单行
#[derive(Debug, Clone, Deserialize)]
pub struct StatsEntry {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "CPUPerc", default)]
    pub cpu_perc: String,
    #[serde(rename = "MemUsage", default)]
    pub mem_usage: String,
}

fn parse_json_lines<T: for<'de> Deserialize<'de>>(stdout: &str) -> Vec<T> {
    stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| match serde_json::from_str(l) {
            Ok(v) => Some(v),
            Err(e) => {
                log::debug!("[docker] skipping malformed line: {}", e);
                None
            }
        })
        .collect()
}

pub fn parse_ps_lines(stdout: &str) -> Vec<PsEntry> {
    parse_json_lines(stdout)
}

pub fn parse_stats_lines(stdout: &str) -> HashMap<String, StatsEntry> {
    parse_json_lines::<StatsEntry>(stdout)
        .into_iter()
        .map(|s| (s.id.clone(), s))
        .collect()
}

/// 以短 id 为键的 label 表
pub fn parse_inspect(stdout: &str) -> HashMap<String, HashMap<String, String>> {
    let entries: Vec<InspectEntry> = match serde_json::from_str(stdout) {
        Ok(v) => v,
        Err(e) => {
            log::debug!("[docker inspect] malformed output: {}", e);
            return HashMap::new();
        }
    };
    entries
        .into_iter()
        .filter(|e| !e.id.is_empty())
        .map(|e| {
            let short: String = e.id.chars().take(SHORT_ID_LEN).collect();
            let labels = e.config.and_then(|c| c.labels).unwrap_or_default();
            (short, labels)
        })
        .collect()
}

/// 从 `0.0.0.0:5432->5432/tcp, :::5432->5432/tcp` 中提取去重后的宿主端口
pub fn parse_published_ports(ports: &str) -> Vec<u16> {
    let mut out: Vec<u16> = PUBLISHED_PORT
        .captures_iter(ports)
        .filter_map(|c| c[1].parse::<u16>().ok())
        .filter(|p| *p > 0)
        .collect();
    out.sort_unstable();
    out.dedup();
    out
}

/// `2.31%` -> 2.31
pub fn parse_cpu_percent(raw: &str) -> f32 {
    raw.trim().trim_end_matches('%').trim().parse().unwrap_or(0.0)
}

/// 把 `51.2MiB / 7.6GiB` 的已用部分换算为 KB
pub fn parse_memory_kb(raw: &str) -> u64 {
    let caps = match MEM_USAGE.captures(raw) {
        Some(c) => c,
        None => return 0,
    };
    let value: f64 = match caps[1].parse() {
        Ok(v) => v,
        Err(_) => return 0,
    };
    let kb = match caps[2].to_ascii_lowercase().as_str() {
        "tib" => value * 1024.0 * 1024.0 * 1024.0,
        "gib" => value * 1024.0 * 1024.0,
        "mib" => value * 1024.0,
        "kib" => value,
        _ => value / 1024.0,
    };
    kb.round() as u64
}

/// 组装容器记录；inspect 和 stats 缺失时退化为默认值
pub fn build_records<F>(
    containers: &[PsEntry],
    labels: &HashMap<String, HashMap<String, String>>,
    stats: &HashMap<String, StatsEntry>,
    resolve_project: F,
) -> Vec<ContainerRecord>
where
    F: Fn(&Path) -> Option<String>,
{
    let empty = HashMap::new();
    containers
        .iter()
        .map(|container| {
            let short_id = container.id.clone();
            let labels = labels.get(&short_id).unwrap_or(&empty);
            let names = Some(container.names.as_str()).filter(|n| !n.is_empty());

            let app_name = labels
                .get(COMPOSE_WORKING_DIR)
                .and_then(|dir| resolve_project(Path::new(dir)))
                .or_else(|| names.map(str::to_string))
                .unwrap_or_else(|| short_id.clone());

            let container_name = labels
                .get(COMPOSE_SERVICE)
                .filter(|s| !s.is_empty())
                .cloned()
                .or_else(|| names.map(str::to_string))
                .unwrap_or_else(|| short_id.clone());

            let (cpu, rss) = stats
                .get(&short_id)
                .map(|s| (parse_cpu_percent(&s.cpu_perc), parse_memory_kb(&s.mem_usage)))
                .unwrap_or((0.0, 0));

            ContainerRecord {
                container_id: short_id,
                container_name,
                ports: parse_published_ports(&container.ports),
                app_name,
                cpu,
                rss,
            }
        })
        .collect()
}

/// 列出运行中的容器并补充 label 与实时资源
///
/// 只有初始的 `docker ps` 失败会让本周期的容器发现为空；
/// inspect 与 stats 各自尽力而为。
pub async fn scan_containers() -> Vec<ContainerRecord> {
    let home = dirs::home_dir();
    scan_containers_with(&SystemRunner, |dir| find_project_name(dir, home.as_deref())).await
}

pub async fn scan_containers_with<R, F>(runner: &R, resolve_project: F) -> Vec<ContainerRecord>
where
    R: CommandRunner,
    F: Fn(&Path) -> Option<String>,
{
    let containers = match runner.run("docker", &["ps", "--format", "{{json .}}"], DOCKER_TIMEOUT).await {
        Ok(out) => parse_ps_lines(&out.stdout),
        Err(e) => {
            log::debug!("[docker ps] unavailable: {}", e);
            return Vec::new();
        }
    };
    if containers.is_empty() {
        return Vec::new();
    }

    let mut inspect_args = vec!["inspect"];
    inspect_args.extend(containers.iter().map(|c| c.id.as_str()));
    let labels = command::run_or_default_with(
        runner,
        "docker inspect",
        "docker",
        &inspect_args,
        DOCKER_TIMEOUT,
        parse_inspect,
    )
    .await;

    let stats = command::run_or_default_with(
        runner,
        "docker stats",
        "docker",
        &["stats", "--no-stream", "--format", "{{json .}}"],
        DOCKER_TIMEOUT,
        parse_stats_lines,
    )
    .await;

    build_records(&containers, &labels, &stats, resolve_project)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::command::{exit_code, stdout, FnRunner};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_parse_published_ports() {
        assert_eq!(
            parse_published_ports("0.0.0.0:5432->5432/tcp, :::5432->5432/tcp"),
            vec![5432]
        );
        assert_eq!(
            parse_published_ports("0.0.0.0:8080->80/tcp, 0.0.0.0:8443->443/tcp"),
            vec![8080, 8443]
        );
        assert!(parse_published_ports("6379/tcp").is_empty());
        assert!(parse_published_ports("").is_empty());
    }

    #[test]
    fn test_parse_memory_units() {
        assert_eq!(parse_memory_kb("51.2MiB / 7.6GiB"), 52429);
        assert_eq!(parse_memory_kb("1.5GiB / 8GiB"), 1572864);
        assert_eq!(parse_memory_kb("900KiB / 1GiB"), 900);
        assert_eq!(parse_memory_kb("2048B / 1GiB"), 2);
        assert_eq!(parse_memory_kb("--"), 0);
    }

    #[test]
    fn test_parse_cpu_percent() {
        assert_eq!(parse_cpu_percent("2.31%"), 2.31);
        assert_eq!(parse_cpu_percent("--"), 0.0);
    }

    #[test]
    fn test_parse_inspect_labels() {
        let output = r#"[
            {"Id": "abc123def4567890", "Config": {"Labels": {"com.docker.compose.service": "db"}}},
            {"Id": "fff000fff0001111", "Config": {"Labels": null}}
        ]"#;
        let labels = parse_inspect(output);
        assert_eq!(labels["abc123def456"]["com.docker.compose.service"], "db");
        assert!(labels["fff000fff000"].is_empty());
        assert!(parse_inspect("not json").is_empty());
    }

    #[test]
    fn test_build_records_with_compose_labels() {
        let containers = parse_ps_lines(
            r#"{"ID":"abc123def456","Names":"shop-db-1","Ports":"0.0.0.0:5432->5432/tcp"}
not json
{"ID":"999888777666","Names":"","Ports":""}"#,
        );
        assert_eq!(containers.len(), 2);

        let mut labels = HashMap::new();
        labels.insert(
            "abc123def456".to_string(),
            HashMap::from([
                (COMPOSE_WORKING_DIR.to_string(), "/home/u/shop".to_string()),
                (COMPOSE_SERVICE.to_string(), "db".to_string()),
            ]),
        );
        let stats = parse_stats_lines(
            r#"{"ID":"abc123def456","CPUPerc":"1.50%","MemUsage":"100MiB / 2GiB"}"#,
        );

        let records = build_records(&containers, &labels, &stats, |dir| {
            dir.file_name().map(|n| n.to_string_lossy().into_owned())
        });

        assert_eq!(records[0].container_name, "db");
        assert_eq!(records[0].app_name, "shop");
        assert_eq!(records[0].ports, vec![5432]);
        assert_eq!(records[0].cpu, 1.5);
        assert_eq!(records[0].rss, 102400);

        // 没有 label、名称与 stats 时退化为 id 与零值
        assert_eq!(records[1].container_name, "999888777666");
        assert_eq!(records[1].app_name, "999888777666");
        assert_eq!(records[1].rss, 0);
    }

    const PS_OUTPUT: &str = r#"{"ID":"abc123def456","Names":"shop-db-1","Ports":"0.0.0.0:5432->5432/tcp"}"#;
    const INSPECT_OUTPUT: &str = r#"[{"Id":"abc123def4567890","Config":{"Labels":{"com.docker.compose.service":"db","com.docker.compose.project.working_dir":"/srv/shop"}}}]"#;
    const STATS_OUTPUT: &str = r#"{"ID":"abc123def456","CPUPerc":"4.00%","MemUsage":"2MiB / 1GiB"}"#;

    fn base_name(dir: &Path) -> Option<String> {
        dir.file_name().map(|n| n.to_string_lossy().into_owned())
    }

    #[tokio::test]
    async fn test_ps_failure_aborts_container_discovery() {
        let calls = AtomicUsize::new(0);
        let runner = FnRunner(|program: &str, _: &[&str]| {
            calls.fetch_add(1, Ordering::SeqCst);
            exit_code(program, 1)
        });
        assert!(scan_containers_with(&runner, base_name).await.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_inspect_and_stats_failures_degrade() {
        let runner = FnRunner(|program: &str, args: &[&str]| match args[0] {
            "ps" => stdout(PS_OUTPUT),
            _ => exit_code(program, 1),
        });
        let records = scan_containers_with(&runner, base_name).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].container_name, "shop-db-1");
        assert_eq!(records[0].app_name, "shop-db-1");
        assert_eq!(records[0].ports, vec![5432]);
        assert_eq!(records[0].cpu, 0.0);
        assert_eq!(records[0].rss, 0);
    }

    #[tokio::test]
    async fn test_full_container_scan() {
        let runner = FnRunner(|program: &str, args: &[&str]| match args[0] {
            "ps" => stdout(PS_OUTPUT),
            "inspect" => {
                assert_eq!(args[1], "abc123def456");
                stdout(INSPECT_OUTPUT)
            }
            "stats" => stdout(STATS_OUTPUT),
            _ => exit_code(program, 2),
        });
        let records = scan_containers_with(&runner, base_name).await;
        assert_eq!(records[0].container_name, "db");
        assert_eq!(records[0].app_name, "shop");
        assert_eq!(records[0].cpu, 4.0);
        assert_eq!(records[0].rss, 2048);
    }

    #[test]
    fn test_unresolvable_compose_dir_falls_back_to_name() {
        let containers = parse_ps_lines(r#"{"ID":"abc123def456","Names":"cache","Ports":""}"#);
        let labels = HashMap::from([(
            "abc123def456".to_string(),
            HashMap::from([(COMPOSE_WORKING_DIR.to_string(), "/nowhere".to_string())]),
        )]);
        let records = build_records(&containers, &labels, &HashMap::new(), |_| None);
        assert_eq!(records[0].app_name, "cache");
        assert_eq!(records[0].container_name, "cache");
    }
}
