use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use cronplane::{app::Application, logging};
use cronplane_config::AppConfig;

#[derive(Parser)]
#[command(name = "cronplane", about = "分布式 Cron 任务调度控制面", version)]
struct Cli {
    /// 配置文件路径（TOML）。缺省时以嵌入模式启动
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_tracing();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;

    Application::new(config).run().await
}
