use clap::Parser;

use app_lib::models::settings::Settings;

/// 从 Notion 读取持仓列表，抓取行情/资金流并生成 AI 技术面点评后写回
#[derive(Parser, Debug)]
#[command(name = "stock-notion-sync", version, about)]
struct Cli {
    /// 只抓取和分析，把将要写入的属性打印到日志
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = app_lib::run(settings, cli.dry_run).await {
        log::error!("初始化失败: {:#}", e);
        std::process::exit(1);
    }
}
