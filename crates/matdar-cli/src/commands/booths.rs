//! Booths command - list booth numbers.

use crate::app::App;
use matdar_core::{Config, Query};

/// Run the booths command.
pub fn run(config: Config) -> anyhow::Result<()> {
    let app = App::new(config)?;
    if app.require_data() {
        return Ok(());
    }

    let label = app.labels.label("booth");
    for booth in app.registry.booths() {
        let voters = app
            .registry
            .search(&Query::all().with_booths([booth.as_str()]).page_size(1))
            .total_matched;
        println!("{} {:>6}  {}", label, booth, voters);
    }

    Ok(())
}
