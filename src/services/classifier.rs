use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeSet;

use crate::models::{Backend, EnabledTypes, ProcessType};

lazy_static! {
    static ref VITE_PATTERN: Regex =
        Regex::new(r#"(?:^|[=/@\s"'`])vite(?:\.js)?(?:$|[\s"'`/:@])"#).unwrap();
    static ref CLAUDE_PATTERNS: [Regex; 3] = [
        Regex::new(r"(?i)@anthropic").unwrap(),
        Regex::new(r"(?i)claude-code").unwrap(),
        Regex::new(r"(?:^|\s|/)claude(?:\s|$)").unwrap(),
    ];
}

/// 命令行是否属于 Vite 开发服务器
pub fn looks_like_vite(command_line: &str) -> bool {
    if command_line.is_empty() {
        return false;
    }
    let normalized = command_line.to_lowercase().replace('\\', "/");
    VITE_PATTERN.is_match(&normalized)
}

/// 命令行是否属于 Claude Code（CLI 或 MCP 会话）
pub fn looks_like_claude(command_line: &str) -> bool {
    if command_line.is_empty() {
        return false;
    }
    CLAUDE_PATTERNS.iter().any(|p| p.is_match(command_line))
}

/// 进程类型的静态配置：枚举用的后端 + 命令行判定
pub struct TypeSpec {
    pub kind: ProcessType,
    /// 容器类型没有进程后端
    pub backend: Option<Backend>,
    matches: fn(&str, Backend) -> bool,
}

impl TypeSpec {
    pub fn matches(&self, command_line: &str, backend: Backend) -> bool {
        self.backend.is_some() && (self.matches)(command_line, backend)
    }
}

/// 按优先级排列：Claude 与 Vite 先于通用的 Node 判定
pub static PROCESS_TYPES: [TypeSpec; 5] = [
    TypeSpec {
        kind: ProcessType::Claude,
        backend: Some(Backend::Node),
        matches: |cmd, _| looks_like_claude(cmd),
    },
    TypeSpec {
        kind: ProcessType::Vite,
        backend: Some(Backend::Node),
        matches: |cmd, backend| backend == Backend::Node && looks_like_vite(cmd),
    },
    TypeSpec {
        kind: ProcessType::Node,
        backend: Some(Backend::Node),
        matches: |_, backend| backend == Backend::Node,
    },
    TypeSpec {
        kind: ProcessType::Bun,
        backend: Some(Backend::Bun),
        matches: |_, backend| backend == Backend::Bun,
    },
    TypeSpec {
        kind: ProcessType::Docker,
        backend: None,
        matches: |_, _| false,
    },
];

/// 对命令行分类；第一个命中的类型胜出
pub fn classify(command_line: &str, backend: Backend) -> Option<ProcessType> {
    PROCESS_TYPES
        .iter()
        .find(|spec| spec.matches(command_line, backend))
        .map(|spec| spec.kind)
}

/// 已启用类型所需的去重后端集合
pub fn needed_backends(enabled: &EnabledTypes) -> BTreeSet<Backend> {
    PROCESS_TYPES
        .iter()
        .filter(|spec| enabled.is_enabled(spec.kind))
        .filter_map(|spec| spec.backend)
        .collect()
}
