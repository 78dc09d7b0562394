use std::{
    fs::{self, File},
    path::{Path, PathBuf},
    process,
};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use clap::Parser;
use daemonize::Daemonize;
use log::{LevelFilter, error, info, warn};
use syslog::{BasicLogger, Facility, Formatter3164};

use glow_ambientd::{
    application::Application, cli::Cli, config::ConfigManager, scheduler::format_instant,
};

fn init_log() -> Result<()> {
    syslog::unix(Formatter3164 {
        facility: Facility::LOG_USER,
        hostname: None,
        process: "glow_ambientd".into(),
        pid: process::id(),
    })
    .map_err(|e| anyhow!("{e}"))
    .and_then(|logger| {
        log::set_boxed_logger(Box::new(BasicLogger::new(logger)))
            .map(|()| log::set_max_level(LevelFilter::Info))
            .map_err(|e| anyhow!("{e}"))
    })
}

fn into_daemon(logfile: &Path, pidfile: Option<&Path>) -> Result<()> {
    File::create(logfile)
        .and_then(|out| Ok((out.try_clone()?, out)))
        .with_context(|| format!("Failed to create {}", logfile.display()))
        .and_then(|(stderr, stdout)| {
            let daemon = Daemonize::new().stdout(stdout).stderr(stderr);
            let daemon = match pidfile {
                Some(path) => daemon.pid_file(path),
                None => daemon,
            };
            daemon.start().map_err(|e| anyhow!("{e}"))
        })
}

/// Pid file written in foreground mode; removed again on drop.
struct PidFile(PathBuf);

impl PidFile {
    fn create(path: &Path) -> Result<Self> {
        fs::write(path, format!("{}\n", process::id()))
            .with_context(|| format!("Failed to write pid file {}", path.display()))?;
        Ok(Self(path.to_path_buf()))
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.0) {
            warn!("Failed to remove pid file {}: {e}", self.0.display());
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    #[cfg(feature = "tokio-console")]
    console_subscriber::init();

    info!(
        "glow_ambientd {} started at {}",
        env!("CARGO_PKG_VERSION"),
        format_instant(Utc::now())
    );

    let config_manager = ConfigManager::load(cli.config).await?;
    Application::builder()
        .with_config_manager(config_manager)
        .build()
        .await?
        .run()
        .await
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Fork before any runtime thread exists.
    if cli.daemonize {
        into_daemon(&cli.logfile, cli.pidfile.as_deref())?;
    }

    if let Err(e) = init_log() {
        eprintln!("glow_ambientd: syslog unavailable ({e}), continuing without logging");
    }

    let _pidfile = match (&cli.pidfile, cli.daemonize) {
        (Some(path), false) => Some(PidFile::create(path)?),
        _ => None,
    };

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?
        .block_on(run(cli));

    if let Err(e) = &result {
        error!("Exiting: {e:#}");
    }
    result
}
