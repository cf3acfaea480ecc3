//! Sync command - run one refresh cycle.

use crate::app::App;
use matdar_core::Config;
use std::time::Instant;

/// Run the sync command. Fails when the refresh attempt fails.
pub fn run(config: Config) -> anyhow::Result<()> {
    let app = App::new(config)?;

    if app.config.sources.remote_url.is_none() {
        println!("No remote_url configured. Nothing to sync.");
        return Ok(());
    }

    let start = Instant::now();
    let outcome = app.registry.sync_now();
    let elapsed = start.elapsed();

    if outcome.skipped {
        println!("Remote store unreachable; sync skipped.");
        return Ok(());
    }

    if let Some(kind) = outcome.error {
        let state = app.registry.sync_state();
        anyhow::bail!(
            "sync failed ({}): {}",
            kind,
            state.last_error_message.unwrap_or_default()
        );
    }

    let dataset = app.registry.current_dataset();
    if outcome.changed {
        println!(
            "Adopted {} records from the remote store in {:.2}s.",
            dataset.len(),
            elapsed.as_secs_f64()
        );
    } else {
        println!(
            "Up to date ({} fetched, {} cached).",
            outcome.fetched.unwrap_or_default(),
            dataset.len()
        );
    }

    Ok(())
}
