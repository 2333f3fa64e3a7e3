//! 门诊排队服务器主程序

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use opd_core::SystemClock;
use opd_database::{create_tables, DatabasePool, PgAssignmentStore, PgEncounterDirectory};
use opd_queue::{
    AssignmentStore, EncounterDirectory, ExpirySweeper, MemoryAssignmentStore, MemoryEncounterDirectory,
    QueueManager, TracingAuditSink,
};
use opd_web::{AppState, WebServer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{LoggingSettings, ServerConfig};

/// 门诊排队服务器命令行参数
#[derive(Parser, Debug)]
#[command(name = "opd-server")]
#[command(about = "门诊分诊排队调度服务器")]
struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    config: Option<String>,

    /// HTTP端口，覆盖配置文件
    #[arg(short, long)]
    port: Option<u16>,

    /// 日志级别，覆盖配置文件
    #[arg(short, long)]
    log_level: Option<String>,
}

fn init_logging(settings: &LoggingSettings) {
    let builder = tracing_subscriber::fmt().with_env_filter(settings.level.as_str());
    if settings.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ServerConfig::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.validate()?;

    // 初始化日志
    init_logging(&config.logging);

    info!(
        "Configuration loaded from {}",
        args.config.as_deref().unwrap_or("defaults and environment")
    );
    info!("Starting OPD queue server...");

    let (store, encounters): (Arc<dyn AssignmentStore>, Arc<dyn EncounterDirectory>) = match &config.database {
        Some(database) => {
            let pool = DatabasePool::connect(database).await?;
            if database.init_schema {
                create_tables(&pool).await?;
            }
            (
                Arc::new(PgAssignmentStore::new(pool.clone())),
                Arc::new(PgEncounterDirectory::new(pool)),
            )
        }
        None => {
            warn!("No database configured, assignments are kept in memory and every encounter is accepted");
            (
                Arc::new(MemoryAssignmentStore::new()),
                Arc::new(MemoryEncounterDirectory::permissive()),
            )
        }
    };

    let manager = Arc::new(QueueManager::new(
        store,
        encounters,
        Arc::new(SystemClock),
        config.queue.clone(),
    )?);

    let shutdown = CancellationToken::new();

    let sweeper = if config.sweeper.enabled {
        let sweeper = ExpirySweeper::new(
            manager.clone(),
            Arc::new(TracingAuditSink),
            Duration::from_secs(config.sweeper.interval_secs),
        );
        Some(sweeper.spawn(shutdown.clone()))
    } else {
        info!("Expiry sweeper disabled");
        None
    };

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                signal.cancel();
            }
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
    });

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let server = WebServer::new(
        addr,
        AppState::new(manager),
        Duration::from_secs(config.server.request_timeout_secs),
    );

    let result = server.run(shutdown.clone()).await;
    shutdown.cancel();

    if let Some(handle) = sweeper {
        handle.await?;
    }

    if let Err(e) = result {
        error!("Server failed: {}", e);
        return Err(e.into());
    }

    info!("OPD queue server stopped");
    Ok(())
}
