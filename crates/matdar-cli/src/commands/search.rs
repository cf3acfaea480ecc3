//! Search command - query the roll.

use crate::app::App;
use crate::OutputFormat;
use matdar_core::{Config, DebouncedSearch, FieldMatcher, Query, QueryPage};
use std::io::{self, BufRead};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Options shared by one-shot and interactive searches
pub struct SearchArgs {
    pub text: String,
    pub booths: Vec<String>,
    pub station: Option<String>,
    pub page: usize,
    pub page_size: usize,
    pub output: OutputFormat,
    pub interactive: bool,
}

impl SearchArgs {
    fn query(&self) -> Query {
        let mut query = Query::text(self.text.as_str())
            .with_booths(self.booths.iter().cloned())
            .page(self.page)
            .page_size(self.page_size);
        if let Some(station) = &self.station {
            query = query.with_polling_station(station.as_str());
        }
        query
    }
}

/// Run the search command.
pub fn run(config: Config, args: SearchArgs) -> anyhow::Result<()> {
    let app = App::new(config)?;
    if app.require_data() {
        return Ok(());
    }

    let printer = Printer {
        output: args.output.clone(),
        no_results: app.labels.label("no_results"),
        booth: app.labels.label("booth"),
    };

    if args.interactive {
        interactive(&app, args.query(), printer, io::stdin().lock())?;
        return Ok(());
    }

    let query = args.query();
    let start = Instant::now();
    let results = app.registry.search(&query);
    printer.print(&query, &results, Some(start.elapsed()))
}

/// Read one query per line.
///
/// Lines arriving faster than the configured debounce period supersede each
/// other; only the last of a burst is searched and printed. Returns the
/// number of result pages printed.
fn interactive(
    app: &App,
    base: Query,
    printer: Printer,
    input: impl BufRead,
) -> anyhow::Result<usize> {
    let printed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&printed);
    let search = DebouncedSearch::new(
        app.registry.clone(),
        app.config.debounce(),
        move |id, query: &Query, page| match printer.print(query, &page, None) {
            Ok(()) => {
                counter.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => warn!(request = id, error = %e, "Cannot print results"),
        },
    );

    for line in input.lines() {
        let query = Query {
            text: line?,
            ..base.clone()
        };
        search.submit(query);
    }

    search.finish();
    Ok(printed.load(Ordering::Relaxed))
}

/// Renders result pages in the chosen output format
struct Printer {
    output: OutputFormat,
    no_results: String,
    booth: String,
}

impl Printer {
    fn print(
        &self,
        query: &Query,
        results: &QueryPage,
        elapsed: Option<Duration>,
    ) -> anyhow::Result<()> {
        let matcher = FieldMatcher::new(&query.text);

        match self.output {
            OutputFormat::Text => {
                if results.records.is_empty() {
                    println!("{}", self.no_results);
                }

                for record in &results.records {
                    let age = record.age.map(|a| a.to_string()).unwrap_or_default();
                    println!(
                        "{:<12} {:<32} {:>3} {:<2} {} {:>4}  {}",
                        record.id.as_str(),
                        record.name,
                        age,
                        record.gender,
                        self.booth,
                        record.booth,
                        record.display_address()
                    );

                    let matched: Vec<String> = matcher
                        .highlights(record)
                        .into_iter()
                        .map(|h| format!("{}:{}", h.field.label(), h.term))
                        .collect();
                    if !matched.is_empty() {
                        println!("             matched {}", matched.join(", "));
                    }
                }

                eprintln!();
                match elapsed {
                    Some(elapsed) => eprintln!(
                        "Page {} of {} ({} matches) in {:.3}ms",
                        results.page,
                        results.page_count().max(1),
                        results.total_matched,
                        elapsed.as_secs_f64() * 1000.0
                    ),
                    None => eprintln!(
                        "Page {} of {} ({} matches) for {:?}",
                        results.page,
                        results.page_count().max(1),
                        results.total_matched,
                        query.text
                    ),
                }
            }
            OutputFormat::Json => {
                let records: Vec<serde_json::Value> = results
                    .records
                    .iter()
                    .map(|record| {
                        serde_json::json!({
                            "record": record,
                            "highlights": matcher.highlights(record),
                        })
                    })
                    .collect();

                let body = serde_json::json!({
                    "query": query.text,
                    "page": results.page,
                    "page_size": results.page_size,
                    "page_count": results.page_count(),
                    "total_matched": results.total_matched,
                    "has_next": results.has_next(),
                    "records": records,
                });
                println!("{}", serde_json::to_string_pretty(&body)?);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matdar_core::Record;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn app_with_voters(temp_dir: &TempDir) -> App {
        let mut config = Config::default();
        config.general.data_dir = Some(temp_dir.path().join("data"));
        config.search.debounce_ms = 200;
        let app = App::new(config).unwrap();
        app.registry
            .import(vec![
                Record::new("A1", "राम पाटील", "5"),
                Record::new("B2", "Shyam", "7"),
            ])
            .unwrap();
        app
    }

    fn printer() -> Printer {
        Printer {
            output: OutputFormat::Json,
            no_results: "none".to_string(),
            booth: "Booth".to_string(),
        }
    }

    #[test]
    fn test_interactive_burst_prints_once() {
        let temp_dir = TempDir::new().unwrap();
        let app = app_with_voters(&temp_dir);

        let input = Cursor::new("p\npa\npatil\n");
        let printed = interactive(&app, Query::all(), printer(), input).unwrap();
        assert_eq!(printed, 1);
    }

    #[test]
    fn test_interactive_empty_input() {
        let temp_dir = TempDir::new().unwrap();
        let app = app_with_voters(&temp_dir);

        let printed = interactive(&app, Query::all(), printer(), Cursor::new("")).unwrap();
        assert_eq!(printed, 0);
    }
}
