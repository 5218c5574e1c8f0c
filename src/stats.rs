//! Index status overview.
//!
//! Summarizes what `srag status` knows about the persisted index: where it
//! lives, how big it is, which model built it, which file content it was
//! built from and when, and whether the configured embedding provider can
//! still query it.

use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::embedding;
use crate::error::Result;
use crate::index::IndexStore;

/// Print the index summary for `config`.
pub async fn run_status(config: &Config) -> Result<()> {
    let store = IndexStore::new(config);

    println!("sheet-rag Index Status");
    println!("======================");
    println!();
    println!("  Index:       {}", store.path().display());

    let Some(index) = store.load().await? else {
        println!("  State:       not built");
        println!();
        println!("  Run `srag ingest <file>` to build it.");
        return Ok(());
    };

    let size = std::fs::metadata(store.path())
        .map(|m| m.len())
        .unwrap_or(0);
    let meta = index.meta();
    let provider = embedding::create_provider(&config.embedding)?;

    println!("  Size:        {}", format_bytes(size));
    println!();
    println!("  Model:       {} ({} dims)", meta.model, meta.dims);
    println!("  Chunks:      {}", meta.chunk_count);
    println!(
        "  Source:      {}",
        meta.source_fingerprint
            .as_ref()
            .map(|fp| fp.short().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    );
    println!("  Built:       {}", format_built_at(&meta.built_at));
    println!(
        "  Compatible:  {}",
        if index.is_compatible(provider.as_ref()) {
            "yes".to_string()
        } else {
            format!("no (configured model: {})", provider.model_name())
        }
    );
    println!();

    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

fn format_built_at(built_at: &str) -> String {
    match DateTime::parse_from_rfc3339(built_at) {
        Ok(dt) => format_relative(dt.with_timezone(&Utc), Utc::now()),
        Err(_) if built_at.is_empty() => "unknown".to_string(),
        Err(_) => built_at.to_string(),
    }
}

/// Relative time such as "3 hours ago"; older than 30 days prints the date.
fn format_relative(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = (now - then).num_seconds();

    if delta < 0 {
        return then.format("%Y-%m-%d %H:%M").to_string();
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        then.format("%Y-%m-%d %H:%M").to_string()
    }
}
