//! Import command - load an ingestion export into the local cache.

use crate::app::App;
use anyhow::Context;
use matdar_core::{decode_batch, Config};
use std::fs;
use std::path::Path;
use std::time::Instant;

/// Run the import command.
pub fn run(config: Config, file: &Path) -> anyhow::Result<()> {
    let bytes = fs::read(file).with_context(|| format!("cannot read {}", file.display()))?;

    let batch = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "import".to_string());
    let report = decode_batch(&bytes, &batch)
        .with_context(|| format!("{} is not a record export", file.display()))?;

    if report.records.is_empty() {
        anyhow::bail!("{} contains no records", file.display());
    }

    let app = App::new(config)?;
    let start = Instant::now();

    let malformed = report.malformed.len();
    let synthetic = report.synthetic_ids;
    let duplicates = report.duplicate_ids.len();
    let dataset = app.registry.import(report.records)?;
    let stats = app.registry.published().index.stats().clone();

    println!("Import complete!");
    println!("  Records:        {}", dataset.len());
    println!("  Incomplete:     {}", malformed);
    println!("  Generated IDs:  {}", synthetic);
    println!("  Duplicate IDs:  {}", duplicates);
    println!("  Distinct names: {}", stats.distinct_names);
    println!("  Time:           {:.2}s", start.elapsed().as_secs_f64());

    Ok(())
}
