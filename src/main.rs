use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use podfetch::{Config, ConsoleSink, Parallelism, Pipeline, RunError, logging};

/// Download the media of every page listed in a content archive.
#[derive(Debug, Parser)]
#[command(name = "podfetch", version)]
#[command(about = "Scrape an archive index and download each page's media", long_about = None)]
struct Cli {
    /// TOML configuration file (defaults are used when omitted).
    #[arg(long, short, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Only process the first N listed items (0 = all).
    #[arg(long = "max", value_name = "N")]
    max_to_fetch: Option<usize>,

    /// Download even when the destination file already exists.
    #[arg(long)]
    overwrite: bool,

    /// Directory downloads are written to.
    #[arg(long, value_name = "DIR")]
    save_to: Option<PathBuf>,

    /// Concurrent page scrapes: a number or "unbounded".
    #[arg(long, value_name = "N")]
    scrape_parallelism: Option<Parallelism>,

    /// Concurrent downloads: a number or "unbounded".
    #[arg(long, value_name = "N")]
    fetch_parallelism: Option<Parallelism>,

    /// Print the final summary as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Append diagnostic logs to this file instead of stderr.
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

impl Cli {
    fn load_config(&self) -> podfetch::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_toml_file(path)?,
            None => Config::default(),
        };

        if let Some(max) = self.max_to_fetch {
            config.max_to_fetch = max;
        }
        if self.overwrite {
            config.overwrite_all = true;
        }
        if let Some(dir) = &self.save_to {
            config.save_to_path = dir.clone();
        }
        if let Some(p) = self.scrape_parallelism {
            config.scrape_parallelism = p;
        }
        if let Some(p) = self.fetch_parallelism {
            config.fetch_parallelism = p;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = logging::init_logging(cli.log_file.as_deref()) {
        eprintln!("podfetch: cannot open log file ({err}), logging to stderr");
        logging::init_logging_stderr();
    }

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("podfetch error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let pipeline = match Pipeline::new(config, Arc::new(ConsoleSink::new())) {
        Ok(pipeline) => pipeline,
        Err(err) => {
            eprintln!("podfetch error: {err}");
            return ExitCode::FAILURE;
        }
    };
    podfetch::cancel_on_signal(pipeline.cancel_token());

    match pipeline.run().await {
        Ok(summary) => {
            if cli.json {
                match serde_json::to_string_pretty(&summary) {
                    Ok(json) => println!("{json}"),
                    Err(err) => eprintln!("podfetch error: {err}"),
                }
            }
            ExitCode::SUCCESS
        }
        Err(RunError::Cancelled { .. }) => ExitCode::from(130),
        // already reported line by line through the status sink
        Err(RunError::Listing(_) | RunError::Faulted { .. }) => ExitCode::FAILURE,
    }
}
