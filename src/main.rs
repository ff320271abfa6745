use actix_web::{web, App, HttpServer};
use clap::Parser;
use std::sync::Arc;
use tokio::sync::watch;

mod models;
mod services;
mod state;
mod api;
mod cli;
mod metrics;

use state::new_state;
use services::{scheduler, Discovery, StatsCollector};
use cli::CommandArgs;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = CommandArgs::parse();
    let prefs = args.preferences();

    if args.once {
        return run_once(&args).await;
    }

    let bind_address = format!("{}:{}", args.address, args.port);
    let state = new_state(prefs);

    // 调度器：立即刷新一次，然后按间隔循环
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_handle = actix_rt::spawn(scheduler::run(state.clone(), shutdown_rx));

    print_banner(&args);

    let server_state = state.clone();
    let result = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(server_state.clone()))
            .configure(api::configure)
    })
        .bind(&bind_address)?
        .run()
        .await;

    // 服务器退出后停止调度，正在进行的周期允许完成
    log::info!("🛑 Server stopped, shutting down scheduler...");
    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler_handle.await {
        log::error!("Scheduler task failed: {}", e);
    }

    result
}

/// 单次扫描，JSON 输出到 stdout
async fn run_once(args: &CommandArgs) -> std::io::Result<()> {
    let config = args.preferences().scan_config();
    let discovery = Discovery::new(Arc::new(StatsCollector::new()));

    let records = discovery.scan(&config).await.map_err(|e| {
        log::error!("❌ Discovery failed: {:#}", e);
        std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
    })?;

    let json = serde_json::to_string_pretty(&records)?;
    println!("{}", json);
    Ok(())
}

fn print_banner(args: &CommandArgs) {
    let prefs = args.preferences();
    let disabled: Vec<String> = args.disable.iter().map(|t| t.to_string()).collect();

    println!("╔═══════════════════════════════════════════════════════════╗");
    println!("║      Node Killer v{:<40}║", env!("CARGO_PKG_VERSION"));
    println!("║      Dev process discovery & termination                  ║");
    println!("╚═══════════════════════════════════════════════════════════╝");
    println!();
    println!("🚀 Server starting on http://{}:{}", args.address, args.port);
    println!();
    println!("📋 Available endpoints:");
    println!("  GET    /api/processes            - Last discovered records");
    println!("  GET    /api/groups               - Records grouped by project");
    println!("  POST   /api/refresh              - Run a discovery cycle now");
    println!("  POST   /api/kill/pid/{{pid}}       - Terminate a process");
    println!("  POST   /api/kill/container/{{id}}  - Stop a container");
    println!("  POST   /api/kill/group/{{name}}    - Terminate a project group");
    println!("  POST   /api/kill/all             - Terminate everything listed");
    println!("  GET    /api/preferences          - Read preferences");
    println!("  PUT    /api/preferences          - Update preferences");
    println!("  GET    /metrics                  - Prometheus metrics");
    println!("  GET    /health                   - Health check");
    println!();
    println!("💡 Settings:");
    println!("  • Refresh: {}", prefs.refresh_ms);
    println!("  • Scope: {}", if prefs.all_users { "all users" } else { "current user" });
    if disabled.is_empty() {
        println!("  • All process types enabled");
    } else {
        println!("  • Disabled types: {}", disabled.join(", "));
    }
    println!("═══════════════════════════════════════════════════════════");
}
