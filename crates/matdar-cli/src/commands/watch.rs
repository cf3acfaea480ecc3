//! Watch command - keep the cache fresh in the foreground.

use crate::app::App;
use crossbeam_channel::{after, never, select};
use matdar_core::{
    ChannelListener, Config, ConnectivityMonitor, DatasetEvent, SyncPhase, SyncScheduler,
};
use std::time::Duration;
use tracing::{error, info};

/// Run the watch command.
pub fn run(config: Config, duration: Option<u64>) -> anyhow::Result<()> {
    let app = App::new(config)?;

    if app.config.sources.remote_url.is_none() {
        eprintln!("No remote_url configured. Nothing to watch.");
        return Ok(());
    }

    let (listener, events) = ChannelListener::new();
    let subscription = app.registry.subscribe(listener);

    let scheduler = SyncScheduler::spawn(app.registry.clone(), app.config.sync_interval())?;
    let monitor = ConnectivityMonitor::spawn(
        app.registry.clone(),
        app.config.connectivity_interval(),
        Some(scheduler.trigger_sender()),
    )?;

    println!("Watching {} records.", app.registry.current_dataset().len());
    println!("Press Ctrl+C to stop.");
    println!();

    let deadline = match duration {
        Some(secs) => after(Duration::from_secs(secs)),
        None => never(),
    };

    loop {
        select! {
            recv(events) -> event => match event {
                Ok(DatasetEvent::Changed { provenance, revision }) => {
                    info!(
                        %provenance,
                        records = revision.record_count,
                        generation = revision.generation,
                        "Dataset changed"
                    );
                    println!(
                        "Dataset {} now has {} records ({})",
                        revision.generation, revision.record_count, provenance
                    );
                }
                Ok(DatasetEvent::Sync(state)) => {
                    if state.phase == SyncPhase::Error {
                        error!(
                            error = state.last_error_message.as_deref().unwrap_or(""),
                            "Sync failed"
                        );
                    }
                }
                Err(_) => break,
            },
            recv(deadline) -> _ => break,
        }
    }

    monitor.stop();
    scheduler.stop();
    app.registry.unsubscribe(subscription);

    println!("Watch stopped.");
    Ok(())
}
