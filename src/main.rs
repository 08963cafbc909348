use anyhow::Context;
use clap::Parser;

mod app;
mod cli;
mod config;
mod records;
mod semantic;
mod stats;
mod tokens;
#[cfg(test)]
mod tests;

use config::Config;
use semantic::CancelToken;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();

    let base_path = app::resolve_base_path()?;
    std::fs::create_dir_all(&base_path)
        .with_context(|| format!("failed to create {}", base_path.display()))?;
    let config = Config::load_with(&base_path)?;

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            log::warn!("Received interrupt, stopping after the current batch");
            cancel.cancel();
        })
        .context("failed to install Ctrl-C handler")?;
    }

    let app = app::App::new(config, base_path, cancel);

    match args.command {
        cli::Command::Index { log } => cli::handle_index(&app, &log),
        cli::Command::Search {
            query,
            top_k,
            role,
            since,
            until,
            conversation,
        } => cli::handle_search(&app, &query, top_k, role, since, until, conversation),
        cli::Command::Clusters { count, seed } => cli::handle_clusters(&app, count, seed),
        cli::Command::Stats {} => cli::handle_stats(&app),
        cli::Command::Thread { conversation_id, json } => cli::handle_thread(&app, &conversation_id, json),
    }
}
