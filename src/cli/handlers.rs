use std::path::Path;

use anyhow::Result;

use crate::app::App;
use crate::stats::render_transcript;

use super::validation::{validate_query, validate_search_filters};

pub fn handle_index(app: &App, log: &Path) -> Result<()> {
    let summary = app.index(log)?;
    log::info!(
        "Indexed {} messages ({} rejected) into {}",
        summary.indexed,
        summary.rejected,
        summary.generation
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

pub fn handle_search(
    app: &App,
    query: &str,
    top_k: Option<usize>,
    role: Option<String>,
    since: Option<String>,
    until: Option<String>,
    conversation: Option<String>,
) -> Result<()> {
    validate_query(query, top_k, app.config().search.max_top_k)?;
    let filters = validate_search_filters(
        role.as_deref(),
        since.as_deref(),
        until.as_deref(),
        conversation.as_deref(),
    )?;

    let results = app.search(query, top_k, &filters)?;
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

pub fn handle_clusters(app: &App, count: Option<usize>, seed: Option<u64>) -> Result<()> {
    let clusters = app.clusters(count, seed)?;
    println!("{}", serde_json::to_string_pretty(&clusters)?);
    Ok(())
}

pub fn handle_stats(app: &App) -> Result<()> {
    let stats = app.stats()?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

pub fn handle_thread(app: &App, conversation_id: &str, json: bool) -> Result<()> {
    let lines = app.thread(conversation_id)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&lines)?);
    } else {
        println!("{}", render_transcript(&lines));
    }
    Ok(())
}
