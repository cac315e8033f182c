pub mod cli;
pub mod commands;
pub mod config;
pub mod data;
pub mod error;
pub mod models;
pub(crate) mod path_util;
pub mod services;
pub mod state;

use std::io::Write;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Command};
use commands::{index_commands, search_commands, worker_commands};
use error::AppError;
use state::AppContext;

const DEFAULT_LOG_FILTER: &str = "ocrindex_lib=info";
// workers share the terminal with the coordinator; keep them quiet
const WORKER_LOG_FILTER: &str = "ocrindex_lib=error";

fn init_tracing(default_filter: &str) {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), AppError> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

async fn dispatch(cli: Cli) -> Result<(), AppError> {
    let storage_dir = cli.storage_dir()?;
    match cli.command {
        Command::Index(args) => {
            let root = args.root.clone();
            let config = args.into_config(storage_dir);
            let mut ctx = AppContext::default();

            let cancel = ctx.cancel_flag.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt received; finishing in-flight work");
                    cancel.store(true, std::sync::atomic::Ordering::Relaxed);
                }
            });

            let summary = index_commands::run_index(&root, &config, &mut ctx).await?;
            print_json(&summary)
        }
        Command::Search(args) => {
            let mut ctx = search_commands::load_context(&storage_dir)?;
            let results = search_commands::search(&mut ctx, &args.query, args.limit, args.mode);
            if args.json {
                print_json(&results)
            } else {
                let stdout = std::io::stdout();
                search_commands::render_results(&mut stdout.lock(), &results)?;
                Ok(())
            }
        }
        Command::Stats => {
            let stats = index_commands::stats(&storage_dir)?;
            print_json(&stats)
        }
        Command::Worker(_) => Err(AppError::General(
            "worker mode runs outside the async runtime".to_string(),
        )),
    }
}

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Command::Worker(args) = &cli.command {
        init_tracing(WORKER_LOG_FILTER);
        worker_commands::run_worker(&args.path, &args.ocr.clone().into())?;
        return Ok(());
    }

    init_tracing(DEFAULT_LOG_FILTER);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    if let Err(err) = runtime.block_on(dispatch(cli)) {
        if err.is_fatal() {
            tracing::error!(error = %err, "aborting");
        }
        return Err(err.into());
    }
    Ok(())
}
