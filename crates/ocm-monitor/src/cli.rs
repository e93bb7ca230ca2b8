use clap::Parser;
use ocm_core::config::MonitorConfig;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "ocm-monitor")]
#[command(about = "Live terminal view of OpenClaw gateway sessions", long_about = None)]
pub struct Args {
    /// Config file (default: ~/.openclaw/openclaw.json)
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub host: Option<String>,
    #[arg(long)]
    pub port: Option<u16>,
    /// Poll interval in milliseconds
    #[arg(long)]
    pub interval_ms: Option<u64>,
    /// Messages shown in the transcript panel
    #[arg(long)]
    pub transcript_limit: Option<usize>,
    /// Write logs here instead of discarding them
    #[arg(long, env = "OCM_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

impl Args {
    /// Flags win over the config file and environment.
    pub fn apply(&self, config: &mut MonitorConfig) {
        if let Some(host) = self.host.as_deref().filter(|host| !host.trim().is_empty()) {
            config.host = host.to_string();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(millis) = self.interval_ms {
            config.set_poll_interval_ms(millis);
        }
        if let Some(limit) = self.transcript_limit {
            config.transcript_limit = limit;
        }
    }
}
