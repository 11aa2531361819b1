use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use chrono_tz::Tz;
use clap::{Parser, ValueEnum};
use tower::Service;
use tracing::info;
use tracing_subscriber::EnvFilter;

use icmega_sync::config::{identities_from_env, DEFAULT_WORKSHEET};
use icmega_sync::{
    report, ChromiumLauncher, Orchestrator, ScraperConfig, SearchStrategy, SheetsClient,
    SheetsConfig, SyncRequest, SyncService,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum StrategyArg {
    /// 検索ページへ直接遷移
    Direct,
    /// メニューからクリックで遷移
    Menu,
}

impl From<StrategyArg> for SearchStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Direct => SearchStrategy::DirectUrl,
            StrategyArg::Menu => SearchStrategy::MenuClick,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "icmega-sync")]
#[command(about = "Sync icmega ticket allocations into the tracking spreadsheet")]
struct Cli {
    #[arg(long, env = "ICMEGA_SPREADSHEET_ID")]
    spreadsheet_id: String,

    #[arg(long, env = "ICMEGA_WORKSHEET", default_value = DEFAULT_WORKSHEET)]
    worksheet: String,

    /// OAuth access token for the Sheets API
    #[arg(long, env = "GOOGLE_SHEETS_TOKEN", hide_env_values = true)]
    token: String,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Scrape and reconcile without writing to the sheet
    #[arg(long)]
    dry_run: bool,

    /// Reference day for the date range (YYYY-MM-DD)
    #[arg(long)]
    today: Option<NaiveDate>,

    #[arg(long, value_enum, default_value_t = StrategyArg::Direct)]
    search_strategy: StrategyArg,

    #[arg(long, default_value = "artifacts")]
    artifacts_dir: PathBuf,

    /// Timezone of the last-updated column
    #[arg(long, env = "ICMEGA_TIMEZONE", default_value = "Asia/Jerusalem")]
    timezone: Tz,

    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "info,icmega_sync=debug"
    } else {
        "info,icmega_sync=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_filter))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let identities = identities_from_env().context("failed to load portal credentials")?;
    for identity in &identities {
        info!("Loaded identity: {:?}", identity);
    }

    let mut config = ScraperConfig::new(identities)
        .with_headless(!cli.headed)
        .with_search_strategy(cli.search_strategy.into())
        .with_artifacts_dir(cli.artifacts_dir)
        .with_timezone(cli.timezone);
    if let Ok(path) = std::env::var("CHROME_PATH") {
        config = config.with_chrome_path(path);
    }

    let sheets = SheetsClient::new(
        SheetsConfig::new(cli.spreadsheet_id, cli.token).with_worksheet(cli.worksheet),
    )
    .context("failed to build Sheets client")?;

    let launcher = ChromiumLauncher::new(&config);
    let mut service = SyncService::new(Orchestrator::new(
        config,
        Arc::new(launcher),
        Arc::new(sheets),
    ));

    let mut request = SyncRequest::new().with_dry_run(cli.dry_run);
    if let Some(today) = cli.today {
        request = request.with_today(today);
    }

    let report = service.call(request).await.context("sync failed")?;
    print!("{}", report::render(&report));

    Ok(())
}
