use clap::{Parser, Subcommand};
use photosync_lib::commands;
use photosync_lib::config::{self, EngineConfig};
use photosync_lib::logging;
use photosync_lib::SyncEngine;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "photosync", version, about = "照片归档备份与硬盘同步")]
struct Cli {
    /// 输出调试日志
    #[arg(short, long, global = true)]
    verbose: bool,

    /// 配置目录（config.json 与日志文件所在位置）
    #[arg(long, global = true, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 比较两个硬盘的内容（只读）
    Compare {
        drive_a: PathBuf,
        drive_b: PathBuf,
        /// 重新计算所有文件的指纹
        #[arg(long)]
        rescan: bool,
    },
    /// 两个硬盘互相补齐缺失的文件，内容冲突只报告
    Sync {
        drive_a: PathBuf,
        drive_b: PathBuf,
        #[arg(long)]
        rescan: bool,
        /// 只显示计划，不复制
        #[arg(long)]
        dry_run: bool,
    },
    /// 以本地归档为准备份到一个或多个硬盘
    Backup {
        archive: PathBuf,
        #[arg(required = true)]
        drives: Vec<PathBuf>,
        #[arg(long)]
        rescan: bool,
        #[arg(long)]
        dry_run: bool,
    },
}

async fn run(
    cli: Cli,
    engine: SyncEngine,
    cancel: CancellationToken,
) -> anyhow::Result<commands::CommandOutput> {
    match cli.command {
        Commands::Compare {
            drive_a,
            drive_b,
            rescan,
        } => commands::compare(&engine, &drive_a, &drive_b, rescan, &cancel).await,
        Commands::Sync {
            drive_a,
            drive_b,
            rescan,
            dry_run,
        } => commands::sync(&engine, &drive_a, &drive_b, rescan, dry_run, &cancel).await,
        Commands::Backup {
            archive,
            drives,
            rescan,
            dry_run,
        } => commands::backup(&engine, &archive, &drives, rescan, dry_run, &cancel).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config_dir = cli
        .config_dir
        .clone()
        .unwrap_or_else(config::default_config_dir);
    let _log_guard = logging::init_logging(&config_dir, cli.verbose);

    let engine = SyncEngine::new(EngineConfig::load(&config_dir));

    // Ctrl-C：正在复制的文件完成或回滚，剩余的标记为已取消
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("收到中断信号，正在停止...");
            signal_token.cancel();
        }
    });

    match run(cli, engine, cancel).await {
        Ok(output) => {
            print!("{}", output.text);
            if output.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
