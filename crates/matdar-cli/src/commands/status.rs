//! Status command - show availability, provenance and sync state.

use crate::app::App;
use matdar_core::Config;

/// Run the status command.
pub fn run(config: Config) -> anyhow::Result<()> {
    let app = App::new(config)?;
    let labels = &app.labels;

    let published = app.registry.published();
    let dataset = &published.dataset;
    let revision = dataset.revision();
    let state = app.registry.sync_state();
    let yes_no = |b: bool| labels.label(if b { "yes" } else { "no" });

    let title = labels.label("title");
    println!("{}", title);
    println!("{}", "=".repeat(title.chars().count()));
    println!();

    println!("  {:<16} {}", labels.label("available"), yes_no(app.registry.availability()));
    println!("  {:<16} {}", labels.label("provenance"), dataset.provenance());
    println!("  {:<16} {}", labels.label("records"), dataset.len());
    println!("  {:<16} {}", labels.label("generation"), revision.generation);
    println!("  {:<16} {}", labels.label("fingerprint"), revision.fingerprint);

    let stats = published.index.stats();
    if stats.malformed > 0 || stats.transliteration_fallbacks > 0 {
        println!(
            "  Index:           {} incomplete, {} untransliterated",
            stats.malformed, stats.transliteration_fallbacks
        );
    }

    println!();
    let last_sync = match state.last_sync {
        Some(at) => at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => labels.label("never"),
    };
    println!("  {:<16} {}", labels.label("last_sync"), last_sync);
    println!("  {:<16} {}", labels.label("phase"), state.phase);
    println!("  {:<16} {}", labels.label("online"), yes_no(state.online));

    if let Some(kind) = state.last_error {
        let message = state.last_error_message.as_deref().unwrap_or("");
        println!("  {:<16} {} {}", labels.label("last_error"), kind, message);
    }

    // Show data directory
    println!();
    println!("Data directory: {}", app.data_dir.display());
    if let Some(url) = &app.config.sources.remote_url {
        println!("Remote:         {}", url);
    }

    Ok(())
}
