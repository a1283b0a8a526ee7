// src/main.rs
use anyhow::Context;
use chrono::Local;
use clap::Parser;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod approval;
mod config;
mod enumerator;
mod model;
mod navigator;
mod notifier;
mod operator;
mod report;
mod session;
mod site;
mod target_adapter;
mod webdriver;
mod workflow;

#[cfg(test)]
mod fake_site;


use config::{AppConfig, OperatingMode, DEFAULT_CONFIG_FILE};
use navigator::UnitCatalog;
use notifier::{Notifier, SmtpNotifier};
use operator::OperatorPrompt;
use webdriver::WebDriverAdapter;
use workflow::{AppError, RunRequest, RunSummary, Workflow};

/// Check and approve one department's Recoru timesheets for one month.
#[derive(Parser, Debug)]
#[command(name = "recoru-approver", version)]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Department number as listed in the menu (asked for when omitted or invalid).
    #[arg(long)]
    unit: Option<usize>,

    #[arg(long)]
    year: Option<i32>,

    #[arg(long)]
    month: Option<u32>,

    /// Only process the staff member with this exact display name.
    #[arg(long)]
    only: Option<String>,

    /// Verify without committing, whatever the configured mode.
    #[arg(long)]
    dry_run: bool,
}

fn init_tracing() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("Failed to install the tracing subscriber")
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    if let Err(e) = init_tracing() {
        eprintln!("{:#}", e);
    }
    let cli = Cli::parse();

    match run(cli).await {
        Ok(summary) => {
            let counts = summary.counts;
            println!(
                "完了: 承認完了 {} / 承認可能(未更新) {} / エラーのため未承認 {} / 処理失敗 {}",
                counts.committed, counts.verified_only, counts.skipped, counts.failed
            );
            println!("結果ファイル: {}", summary.report_path.display());
            if !summary.notified {
                println!("メールは送信されていません (ログを確認してください)。");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Run aborted: {}", e);
            eprintln!("エラーのため処理を中止しました: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<RunSummary, AppError> {
    // Mode is validated while loading, before any browser work.
    let config = AppConfig::load(&cli.config)?;
    info!("Configuration loaded from {:?}", cli.config);

    let catalog = config
        .units
        .clone()
        .map(UnitCatalog::from_names)
        .unwrap_or_default();

    let (unit, period) = {
        let stdin = io::stdin();
        let mut prompt = OperatorPrompt::new(stdin.lock(), io::stdout());
        let unit = prompt.unit(&catalog, cli.unit)?;
        let period = prompt.period(Local::now().date_naive(), cli.year.zip(cli.month))?;
        (unit, period)
    };

    let request = RunRequest {
        unit,
        period,
        mode: if cli.dry_run {
            OperatingMode::DryRun
        } else {
            config.mode
        },
        filter_identity: cli.only.or_else(|| config.filter_identity.clone()),
    };

    let notifier = match &config.mail {
        Some(mail) => match SmtpNotifier::new(mail) {
            Ok(notifier) => Some(notifier),
            Err(e) => {
                warn!("Mail settings are unusable; the report will not be sent: {}", e);
                None
            }
        },
        None => None,
    };

    let adapter = WebDriverAdapter::connect(&config.browser, config.timeouts)
        .await
        .map_err(AppError::Browser)?;

    Workflow::new(
        &config,
        Arc::new(adapter),
        notifier.as_ref().map(|n| n as &dyn Notifier),
    )
    .run(&request)
    .await
}
