//! capture-hook binary entry point.
//!
//! Usage: capture-hook [--base-dir <dir>] [capture [--stdin] | drain [--watch] | status]
//!
//! With no subcommand the hook captures the event described by the
//! `CLAUDE_*` environment variables.

use anyhow::Context;
use capture_delivery::DeliveryClient;
use capture_hook::{
    run_capture, run_capture_until, shutdown_signal, status_report, Drainer, HookConfig, HookInput,
};
use capture_queue::{FsRetryQueue, RetryQueue};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// capture-hook: conversation event capture with a durable retry queue.
#[derive(Parser, Debug)]
#[command(name = "capture-hook", version)]
#[command(about = "Capture host tool events and deliver them to the collection endpoint")]
struct Cli {
    /// Base directory for config, logs and queue.
    #[arg(long, global = true, env = "CAPTURE_HOME")]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Capture one event (the default)
    Capture {
        /// Also read the host's JSON hook input from stdin
        #[arg(long)]
        stdin: bool,
    },
    /// Resubmit queued events
    Drain {
        /// Keep draining until ctrl-c or SIGTERM
        #[arg(long)]
        watch: bool,

        /// Seconds between passes in watch mode
        #[arg(long)]
        interval_secs: Option<u64>,
    },
    /// Print a JSON health report
    Status,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if !err.use_stderr() => err.exit(),
        Err(err) => {
            // Unknown arguments must not fail the host; capture anyway.
            eprintln!("capture-hook: {err}");
            Cli {
                base_dir: None,
                command: None,
            }
        }
    };

    let command = cli.command.unwrap_or(Commands::Capture { stdin: false });

    match command {
        Commands::Capture { stdin } => ExitCode::from(capture(cli.base_dir, stdin).await),
        Commands::Drain {
            watch,
            interval_secs,
        } => report(drain(cli.base_dir, watch, interval_secs).await),
        Commands::Status => report(status(cli.base_dir).await),
    }
}

fn report(result: anyhow::Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("capture-hook: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn capture(base_dir: Option<PathBuf>, stdin: bool) -> u8 {
    let settings = match HookConfig::load(base_dir) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("capture-hook: {err}");
            return 0;
        }
    };

    let mut input = HookInput::from_env();
    if stdin {
        if let Some(document) = capture_hook::input::read_stdin_json().await {
            input.merge_stdin(&document);
        }
    }

    let outcome = match shutdown_signal() {
        Ok(signal) => run_capture_until(&settings, input, signal).await,
        Err(err) => {
            eprintln!("capture-hook: cannot listen for termination signals: {err}");
            run_capture(&settings, input).await
        }
    };
    outcome.exit_code()
}

async fn drain(
    base_dir: Option<PathBuf>,
    watch: bool,
    interval_secs: Option<u64>,
) -> anyhow::Result<()> {
    let settings = HookConfig::load(base_dir).context("failed to load configuration")?;
    let logging = capture_config::init_logging(&settings.config, &settings.paths);

    let result = async {
        let delivery = DeliveryClient::new(settings.delivery_config()?)?;
        let queue: Arc<dyn RetryQueue> = Arc::new(FsRetryQueue::new(settings.queue_config()));
        let drainer = Drainer::new(queue, Arc::new(delivery), settings.drain_config());

        if watch {
            let interval = interval_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(drainer.config().interval);
            drainer.run(interval).await?;
        } else {
            let report = drainer.drain_once().await?;
            info!(channel = "queue", processed = report.processed(), "Drain complete");
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        anyhow::Ok(())
    }
    .await;

    if let Err(err) = &result {
        error!(error = %err, "Drain failed");
    }
    logging.shutdown().await;
    result
}

async fn status(base_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let settings = HookConfig::load(base_dir).context("failed to load configuration")?;
    let report = status_report(&settings).await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
