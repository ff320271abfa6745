use serde::Serialize;

#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct ProcessStats {
    /// CPU 使用率 (瞬时百分比)
    pub cpu_usage: f32,

    /// 常驻内存 (KB)
    pub rss_kb: u64,

    /// 完整命令行
    pub command_line: String,
}

impl ProcessStats {
    /// 创建一个空的统计数据
    pub fn empty() -> Self {
        Self::default()
    }
}
