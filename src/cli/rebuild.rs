// src/cli/rebuild.rs
// `convolink rebuild`: drives Rebuilder::rebuild with the options from §4.7.

use crate::cache::HashCache;
use crate::config::Config;
use crate::rebuild::{rebuild as run_rebuild, CancellationToken, RebuildOptions};
use anyhow::Result;
use std::path::PathBuf;

#[allow(clippy::too_many_arguments)]
pub async fn run(
    dry_run: bool,
    domain: Option<String>,
    limit: Option<usize>,
    batch_size: usize,
    db: Option<PathBuf>,
) -> Result<()> {
    let config = Config::load();
    let db_path = db.unwrap_or(config.db_path);
    let store = crate::store::sqlite::SqliteStore::open(&db_path).await?;
    let cache = HashCache::new(config.cache_capacity);

    let options = RebuildOptions {
        dry_run,
        domain,
        limit,
        batch_size,
        request_ids: None,
        subtask_window: config.subtask_window,
    };
    let cancel = CancellationToken::new();

    let summary = run_rebuild(&store, &cache, &options, &cancel).await?;

    println!(
        "scanned={} linked={} updated={} unchanged={} skipped_errors={}",
        summary.scanned, summary.linked, summary.updated, summary.unchanged, summary.skipped_errors
    );
    if dry_run {
        println!("(dry run: no updates were applied)");
    }
    for warning in &summary.integrity_warnings {
        println!("WARNING: {}", warning.message);
    }

    Ok(())
}
