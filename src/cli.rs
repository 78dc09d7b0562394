use clap::Parser;
use std::path::PathBuf;

/// glow-ambientd: fades a PiGlow with the sun, dark while a watched host is down
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// YAML config file path (default: searched in the usual locations)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Write the process id to this file
    #[arg(short = 'p', long = "pidfile")]
    pub pidfile: Option<PathBuf>,

    /// Redirect stdout and stderr here when daemonized
    #[arg(short = 'l', long = "logfile", default_value = "/var/tmp/glow_ambientd.log")]
    pub logfile: PathBuf,

    /// Detach from the terminal and run in the background
    #[arg(short = 'd', long = "daemonize", default_value = "false")]
    pub daemonize: bool,
}
