//! catalog-harvest - command-line entry point

use std::path::PathBuf;

use catalog_harvest::{
    Config, ConsolePolicy, Event, ExtractionSession, FailurePolicy, FailurePolicyMode,
    FixedPolicy, RunOutcome, SessionStats,
};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Exit code for a run that stopped early but can be resumed
const EXIT_RESUMABLE: i32 = 2;
/// Exit code for a rejected credential
const EXIT_AUTH: i32 = 3;

/// Resumable extraction of the movie catalog into CSV
#[derive(Parser, Debug)]
#[command(name = "catalog-harvest", version, about)]
struct Cli {
    /// JSON configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// API read access token
    #[arg(long, env = "TMDB_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// API base URL
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,

    /// Output CSV file
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Checkpoint file
    #[arg(long, value_name = "PATH")]
    checkpoint: Option<PathBuf>,

    /// Release years to extract, e.g. 2020,2021
    #[arg(long, value_delimiter = ',')]
    years: Option<Vec<i32>>,

    /// How to resolve failures once retries are spent
    #[arg(long, value_enum)]
    on_failure: Option<FailurePolicyMode>,

    /// Skip the credential check before starting
    #[arg(long)]
    no_probe: bool,
}

impl Cli {
    /// Load the config file (or defaults) and apply command-line overrides
    fn into_config(self) -> catalog_harvest::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };

        if let Some(api_key) = self.api_key {
            config.api.api_key = api_key;
        }
        if let Some(base_url) = self.base_url {
            config.api.base_url = base_url;
        }
        if let Some(output) = self.output {
            config.extraction.output_path = output;
        }
        if let Some(checkpoint) = self.checkpoint {
            config.extraction.checkpoint_path = checkpoint;
        }
        if let Some(years) = self.years {
            config.extraction.partitions = years;
        }
        if let Some(mode) = self.on_failure {
            config.failure_policy = mode;
        }
        if self.no_probe {
            config.api.probe_id = None;
        }
        Ok(config)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // stdout carries progress and the prompt; logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let code = match run(Cli::parse()).await {
        Ok(outcome) => report(&outcome),
        Err(e) if e.is_authentication() => {
            eprintln!("Authentication failed: {}", e);
            eprintln!("Check the API key; no progress was recorded for this run.");
            EXIT_AUTH
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> catalog_harvest::Result<RunOutcome> {
    let config = cli.into_config()?;

    let policy: Box<dyn FailurePolicy> = match config.failure_policy.fixed_choice() {
        Some(choice) => Box::new(FixedPolicy::new(choice)),
        None => Box::new(ConsolePolicy::stdio()),
    };

    let mut session = ExtractionSession::new(config, policy)?;

    let mut events = session.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let Some(line) = describe(&event) {
                println!("{}", line);
            }
        }
    });

    let result = session.run_until(catalog_harvest::shutdown_signal()).await;

    // closing the channel lets the printer drain and stop
    drop(session);
    printer.await.ok();
    result
}

/// Status line for an event, `None` for events that are too chatty to print
fn describe(event: &Event) -> Option<String> {
    let line = match event {
        Event::PartitionSkipped { partition } => {
            format!("\nSkipping year {} (already completed)", partition)
        }
        Event::PartitionStarted {
            partition,
            start_page,
        } if *start_page > 1 => {
            format!("\nResuming year {} from page {}...", partition, start_page)
        }
        Event::PartitionStarted { partition, .. } => format!("\nProcessing year {}...", partition),
        Event::PageFetched {
            page,
            total_pages,
            items,
            new_items,
            ..
        } => format!(
            "  Page {}/{}: {} movies, {} new",
            page, total_pages, items, new_items
        ),
        Event::EmptyPage { page, streak, .. } => {
            format!("  Page {}: no results (empty page #{})", page, streak)
        }
        Event::Milestone {
            total_records,
            partition_records,
        } => format!(
            "    Extracted {} movies total ({} new from this year)...",
            total_records, partition_records
        ),
        Event::ItemFailed { id, reason } => format!("    Skipped {}: {}", id, reason),
        Event::PersistenceFailed { message } => format!("  Write failed: {}", message),
        Event::Escalated {
            position, choice, ..
        } => format!("  -> {} at {}", choice, position),
        Event::PartitionFinished {
            partition,
            records,
            abandoned,
        } => {
            let verb = if *abandoned { "Abandoned" } else { "Completed" };
            format!(
                "  {} {}. Extracted {} new movies from this year.",
                verb, partition, records
            )
        }
        Event::RecordWritten { .. } | Event::CheckpointSaved { .. } => return None,
    };
    Some(line)
}

/// Print the summary and pick the exit code
fn report(outcome: &RunOutcome) -> i32 {
    match outcome {
        RunOutcome::Completed { stats } => {
            println!("\nExtraction complete!");
            print_stats(stats);
            0
        }
        RunOutcome::Aborted { position, stats } => {
            println!("\nExtraction stopped.");
            print_stats(stats);
            println!("Progress saved. Run again to resume from {}.", position);
            EXIT_RESUMABLE
        }
        RunOutcome::Interrupted { position, stats } => {
            println!("\nExtraction interrupted.");
            print_stats(stats);
            match position {
                Some(position) => {
                    println!("Progress saved. Run again to resume from {}.", position)
                }
                None => println!("No page was reached; the next run starts over."),
            }
            EXIT_RESUMABLE
        }
    }
}

fn print_stats(stats: &SessionStats) {
    println!("  Movies in output:   {}", stats.total_records);
    println!("  Written this run:   {}", stats.records_written);
    println!("  Failed requests:    {}", stats.failed_requests);
    println!("  Skipped items:      {}", stats.skipped_items);
    if stats.persistence_failures > 0 {
        println!("  Write failures:     {}", stats.persistence_failures);
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use catalog_harvest::{Error, FailureChoice, Position};

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from([
            "catalog-harvest",
            "--api-key",
            "secret",
            "--years",
            "2021,2022",
            "--on-failure",
            "abandon",
            "--output",
            "out.csv",
            "--no-probe",
        ]);
        let config = cli.into_config().unwrap();

        assert_eq!(config.api.api_key, "secret");
        assert_eq!(config.extraction.partitions, vec![2021, 2022]);
        assert_eq!(
            config.failure_policy.fixed_choice(),
            Some(FailureChoice::AbandonPartition)
        );
        assert_eq!(config.extraction.output_path, PathBuf::from("out.csv"));
        assert_eq!(config.api.probe_id, None);
    }

    #[test]
    fn defaults_survive_without_flags() {
        let config = Cli::parse_from(["catalog-harvest", "--api-key", "k"])
            .into_config()
            .unwrap();
        let defaults = Config::default();
        assert_eq!(config.extraction.partitions, defaults.extraction.partitions);
        assert_eq!(config.api.probe_id, defaults.api.probe_id);
        assert_eq!(config.failure_policy, FailurePolicyMode::Prompt);
    }

    #[test]
    fn resumable_outcomes_use_distinct_exit_code() {
        let stats = SessionStats::default();
        assert_eq!(report(&RunOutcome::Completed { stats: stats.clone() }), 0);
        assert_eq!(
            report(&RunOutcome::Aborted {
                position: Position {
                    partition: 2022,
                    page: 5
                },
                stats: stats.clone(),
            }),
            EXIT_RESUMABLE
        );
        assert_eq!(
            report(&RunOutcome::Interrupted {
                position: None,
                stats
            }),
            EXIT_RESUMABLE
        );
    }

    #[test]
    fn chatty_events_are_not_printed() {
        assert!(describe(&Event::CheckpointSaved {
            position: Position {
                partition: 2020,
                page: 2
            }
        })
        .is_none());
        assert_eq!(
            describe(&Event::PartitionStarted {
                partition: 2021,
                start_page: 4
            })
            .unwrap(),
            "\nResuming year 2021 from page 4..."
        );
    }

    #[test]
    fn auth_errors_are_recognised() {
        let err = Error::Authentication {
            status: 401,
            message: "Invalid API key".to_string(),
        };
        assert!(err.is_authentication());
    }
}
