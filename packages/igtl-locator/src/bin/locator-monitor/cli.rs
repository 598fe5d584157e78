use clap::Parser;
use igtl_locator::LocatorConfig;

#[derive(Parser)]
#[command(
    name = "locator-monitor",
    version,
    about = "Headless OpenIGTLink locator monitor",
    long_about = "Connect to an OpenIGTLink tracking server, start tracking, activate a locator\n\
                  channel for every announced tool and report marker poses.\n\
                  Defaults come from LOCATOR_* environment variables (and .env)."
)]
pub struct Cli {
    /// OpenIGTLink server host
    #[arg(long, env = "LOCATOR_HOST")]
    pub host: Option<String>,

    /// OpenIGTLink server port
    #[arg(short, long, env = "LOCATOR_PORT")]
    pub port: Option<u16>,

    /// Number of locator channels
    #[arg(long, env = "LOCATOR_CHANNELS")]
    pub channels: Option<usize>,

    /// Connection attempts before giving up
    #[arg(long, env = "LOCATOR_CONNECT_ATTEMPTS")]
    pub attempts: Option<u32>,

    /// Delay between connection attempts in milliseconds
    #[arg(long, env = "LOCATOR_RETRY_DELAY_MS")]
    pub retry_delay_ms: Option<u64>,

    /// Update interval requested from the server in milliseconds
    #[arg(long, env = "LOCATOR_QUERY_RESOLUTION_MS")]
    pub resolution_ms: Option<u32>,

    /// Connect without sending the start-tracking query
    #[arg(long)]
    pub no_track: bool,

    /// Stop after this many seconds (default: run until Ctrl-C)
    #[arg(long)]
    pub duration: Option<u64>,

    /// Print the final panel state as JSON
    #[arg(long)]
    pub json: bool,

    /// Compact JSON output (no pretty-printing)
    #[arg(long, requires = "json")]
    pub compact: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Overlay command-line values onto a loaded configuration
    pub fn apply(&self, config: &mut LocatorConfig) {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(channels) = self.channels {
            config.channels = channels;
        }
        if let Some(attempts) = self.attempts {
            config.retry.attempts = attempts;
        }
        if let Some(delay) = self.retry_delay_ms {
            config.retry.delay_ms = delay;
        }
        if let Some(resolution) = self.resolution_ms {
            config.query_resolution_ms = resolution;
        }
    }
}
