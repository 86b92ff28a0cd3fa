// porter/src/main.rs
use std::fs;
use std::process;

use clap::Parser;
use porter_common::config::Config;
use porter_common::error::{PorterError, Result as PorterResult};
use tracing::level_filters::LevelFilter;
use tracing::{debug, error};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

mod cli;
mod server;

use cli::CliArgs;

/// Logs always go to stderr: in `serve` mode stdout carries the protocol.
/// The returned guard flushes the log file when dropped.
fn init_logging(config: &Config, verbose: u8) -> Option<WorkerGuard> {
    let level_filter = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let max_log_level = level_filter.into_level().unwrap_or(tracing::Level::INFO);

    let env_filter = EnvFilter::builder()
        .with_default_directive(level_filter.into())
        .with_env_var("PORTER_LOG")
        .from_env_lossy();

    let log_dir = config.logs_dir();
    if verbose == 0 {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .without_time()
            .try_init();
        None
    } else if let Err(e) = fs::create_dir_all(&log_dir) {
        eprintln!(
            "Error: Failed to create log directory {}: {}",
            log_dir.display(),
            e
        );
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .without_time()
            .try_init();
        None
    } else {
        let file_appender = tracing_appender::rolling::daily(&log_dir, "porter.log");
        let (non_blocking_appender, guard) = tracing_appender::non_blocking(file_appender);

        let stderr_writer = std::io::stderr.with_max_level(max_log_level);
        let file_writer = non_blocking_appender.with_max_level(max_log_level);

        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(stderr_writer.and(file_writer))
            .with_ansi(false)
            .try_init();

        debug!(
            "Verbose logging enabled. Writing logs to: {}/porter.log",
            log_dir.display()
        );
        Some(guard)
    }
}

#[tokio::main]
async fn main() -> PorterResult<()> {
    let cli_args = CliArgs::parse();

    let config = Config::load()
        .map_err(|e| PorterError::Config(format!("Could not load config: {e}")))?;

    let log_guard = init_logging(&config, cli_args.verbose);
    debug!(
        "Running {:?} (stdout reserved for protocol: {})",
        cli_args.command,
        cli_args.command.owns_stdout()
    );

    if let Err(e) = cli_args.command.run(config).await {
        error!("Command failed: {}", e.causal_chain());
        eprintln!("Error: {e:#}");
        // process::exit skips destructors.
        drop(log_guard);
        process::exit(1);
    }

    debug!("Command completed successfully.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_file_logging_hands_back_a_guard() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            porter_root: dir.path().to_path_buf(),
            ..Config::default()
        };
        assert!(init_logging(&config, 0).is_none());
        assert!(!config.logs_dir().exists());

        let guard = init_logging(&config, 1);
        assert!(guard.is_some());
        assert!(config.logs_dir().is_dir());
        drop(guard);
    }
}
