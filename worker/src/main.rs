//! Parallel test worker.
//!
//! Connects to the master, collects tests locally, and runs whatever the
//! master hands out until told to stop.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, info_span};

use worker::context::RunContext;
use worker::coordinator::{Coordinator, RunStop};
use worker::core::errors::is_terminated;
use worker::exit_codes;
use worker::io::channel::TcpTransport;
use worker::io::collect::CommandCollector;
use worker::io::config::{DEFAULT_CONFIG_PATH, WorkerConfig, load_config};
use worker::io::engine::CommandEngine;
use worker::io::signal::{QuitToken, install_quit_handler};
use worker::link::MasterLink;
use worker::logging;
use worker::session::run_session;

#[derive(Parser, Debug)]
#[command(name = "worker", version, about = "Parallel test worker")]
struct Cli {
    /// Name of this worker, unique within the session.
    worker_id: String,

    /// Master endpoint (`host:port`); overrides `master.endpoint`.
    #[arg(long)]
    endpoint: Option<String>,

    /// Path to the worker config file.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// URL of the system under test assigned to this worker.
    #[arg(long)]
    base_url: Option<String>,

    /// Session timestamp shared with the master.
    #[arg(long)]
    ts: Option<String>,

    /// Report pulled node ids instead of running them.
    #[arg(long)]
    collect_only: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => ExitCode::from(code as u8),
        Err(err) if is_terminated(&err) => {
            // Told to die: leave without any further cleanup.
            std::process::exit(exit_codes::OK);
        }
        Err(err) => {
            error!(err = %format!("{err:#}"), "worker failed");
            eprintln!("{:#}", err);
            ExitCode::from(exit_codes::FAILED as u8)
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let cfg = resolve_config(&cli)?;
    logging::init(cfg.log.file.as_deref())?;

    let _span = info_span!("worker", id = %cli.worker_id).entered();
    let ctx = RunContext {
        worker_id: cli.worker_id.clone(),
        base_url: cli.base_url.clone(),
        ts: cli.ts.clone(),
    };

    let quit = QuitToken::new();
    install_quit_handler(&quit)?;

    let transport = TcpTransport::connect(&cfg.master.endpoint, &ctx.worker_id, cfg.read_timeout())
        .context("open master channel")?;
    let mut coordinator = Coordinator::new(
        MasterLink::new(transport),
        ctx.clone(),
        quit,
        cfg.collect_only,
    );
    let collector = CommandCollector {
        command: cfg.collect.command.clone(),
        ctx: ctx.clone(),
    };
    let mut engine = CommandEngine {
        command: cfg.run.command.clone(),
        timeout: cfg.test_timeout(),
        output_limit_bytes: cfg.run.output_limit_bytes,
        ctx,
    };

    let summary = run_session(&mut coordinator, &collector, &mut engine)?;
    info!(executed = summary.executed, stop = ?summary.stop, "session finished");
    Ok(match summary.stop {
        RunStop::Exhausted => exit_codes::OK,
        RunStop::QuitRequested => exit_codes::QUIT,
    })
}

/// Load the config file and apply command-line overrides.
fn resolve_config(cli: &Cli) -> Result<WorkerConfig> {
    let mut cfg = load_config(&cli.config)?;
    if let Some(endpoint) = &cli.endpoint {
        cfg.master.endpoint = endpoint.clone();
    }
    if cli.collect_only {
        cfg.collect_only = true;
    }
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal() {
        let cli = Cli::parse_from(["worker", "w1"]);
        assert_eq!(cli.worker_id, "w1");
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert!(!cli.collect_only);
    }

    #[test]
    fn cli_overrides_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cli = Cli::parse_from([
            "worker",
            "w2",
            "--config",
            temp.path().join("missing.toml").to_str().expect("utf8 path"),
            "--endpoint",
            "master:9000",
            "--collect-only",
        ]);
        let cfg = resolve_config(&cli).expect("resolve");
        assert_eq!(cfg.master.endpoint, "master:9000");
        assert!(cfg.collect_only);
    }
}
