use clap::{{Parser}};

use crate::models::{EnabledTypes, Preferences, ProcessType, RefreshInterval};

/// Node Killer - 开发进程发现与终止服务
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CommandArgs {
    /// 监听端口
    #[arg(short, long, env = "PORT", default_value_t = 9797)]
    pub port: u16,

    /// 监听地址
    #[arg(short = 'a', long, env = "ADDRESS", default_value = "127.0.0.1")]
    pub address: String,

    /// 自动刷新间隔（毫秒），或 `paused`
    #[arg(short = 'r', long, env = "REFRESH_MS", default_value = "5000", value_parser = parse_refresh)]
    pub refresh_ms: RefreshInterval,

    /// 扫描所有用户的进程（默认只扫描当前用户）
    #[arg(long, env = "NODEKILLER_ALL_USERS")]
    pub all_users: bool,

    /// 禁用某类进程，可重复
    #[arg(short = 'd', long = "disable", value_name = "TYPE")]
    pub disable: Vec<ProcessType>,

    /// 只扫描一次，以 JSON 输出后退出
    #[arg(long)]
    pub once: bool,
}

fn parse_refresh(raw: &str) -> Result<RefreshInterval, String> {
    Ok(RefreshInterval::sanitize(raw))
}

impl CommandArgs {
    /// 由命令行参数构造初始偏好设置
    pub fn preferences(&self) -> Preferences {
        let mut process_types = EnabledTypes::default();
        for kind in &self.disable {
            process_types.set(*kind, false);
        }
        Preferences {
            refresh_ms: self.refresh_ms,
            all_users: self.all_users,
            process_types,
        }
    }
}
