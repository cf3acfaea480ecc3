//! Clear command - remove all cached data.

use crate::app::App;
use matdar_core::Config;
use std::io::{self, Write};

/// Run the clear command.
pub fn run(config: Config, skip_confirm: bool) -> anyhow::Result<()> {
    let app = App::new(config)?;

    if !app.registry.availability() {
        println!("No cached data found. Nothing to clear.");
        return Ok(());
    }

    if !skip_confirm {
        print!(
            "This will delete {} cached records. Are you sure? [y/N] ",
            app.registry.current_dataset().len()
        );
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    app.registry.clear()?;
    println!("Cache cleared.");

    Ok(())
}
