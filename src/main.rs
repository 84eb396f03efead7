use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use crossbeam_channel::select;
use dirwatch::{Notify, Settings, logging, new_watcher_with};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dirwatch")]
#[command(about = "Watch directories recursively and print changed paths")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to the nearest .dirwatch/settings.toml)
    #[arg(long, global = true, env = "DIRWATCH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration file
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show current configuration
    Config,

    /// Watch directories and print one line per change
    Watch {
        /// Directories to watch (recursively)
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Batching latency in milliseconds (overrides config)
        #[arg(long)]
        latency_ms: Option<u64>,

        /// Exit after this many events
        #[arg(short = 'n', long, value_parser = clap::value_parser!(u64).range(1..))]
        count: Option<u64>,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    };
    let mut settings = loaded.unwrap_or_else(|e| {
        eprintln!("Configuration error: {e}");
        Settings::default()
    });

    logging::init_with_config(&settings.logging);

    match cli.command {
        Commands::Init { force } => {
            let path = Settings::init_config_file(force)
                .map_err(|e| anyhow::anyhow!("{e}"))
                .context("failed to write configuration")?;
            println!("Created configuration file at: {}", path.display());
        }

        Commands::Config => {
            println!(
                "{}",
                settings.to_toml().context("failed to render configuration")?
            );
        }

        Commands::Watch {
            paths,
            latency_ms,
            count,
            json,
        } => {
            if let Some(ms) = latency_ms {
                settings.watcher.latency_ms = ms;
            }
            run_watch(&settings, &paths, count, json)?;
        }
    }

    Ok(())
}

fn run_watch(
    settings: &Settings,
    paths: &[PathBuf],
    count: Option<u64>,
    json: bool,
) -> anyhow::Result<()> {
    let watcher = new_watcher_with(&settings.watcher).context("failed to create watcher")?;

    for path in paths {
        let canonical = path
            .canonicalize()
            .with_context(|| format!("cannot resolve {}", path.display()))?;
        if !canonical.is_dir() {
            bail!("{} is not a directory", canonical.display());
        }
        watcher
            .add(&canonical)
            .with_context(|| format!("cannot watch {}", canonical.display()))?;
        eprintln!("Watching {}", canonical.display());
    }

    let events = watcher.events();
    let errors = watcher.errors();
    let mut seen: u64 = 0;

    loop {
        select! {
            recv(events) -> event => match event {
                Ok(event) => {
                    if json {
                        println!("{}", serde_json::to_string(&event)?);
                    } else {
                        println!("{event}");
                    }
                    seen += 1;
                    if count.is_some_and(|limit| seen >= limit) {
                        break;
                    }
                }
                Err(_) => break,
            },
            recv(errors) -> err => match err {
                Ok(err) => eprintln!("Error: {err}"),
                Err(_) => break,
            },
        }
    }

    watcher.close().context("failed to stop watcher")?;
    Ok(())
}
