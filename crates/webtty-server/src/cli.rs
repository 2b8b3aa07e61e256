use std::path::PathBuf;

use clap::Parser;

/// Share a terminal command with web browsers.
///
/// Flags override values from the config file.
#[derive(Debug, Default, Parser)]
#[command(name = "webtty", version)]
pub struct Cli {
    /// TOML config file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// IP address to listen on
    #[arg(short, long)]
    pub address: Option<String>,

    /// Port number to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Allow clients to write to the terminal
    #[arg(short = 'w', long)]
    pub permit_write: bool,

    /// Token clients must present when connecting
    #[arg(short, long)]
    pub credential: Option<String>,

    /// Allow clients to append command line arguments with `?args=`
    #[arg(long)]
    pub permit_arguments: bool,

    /// Fixed terminal width (0 follows the client)
    #[arg(long)]
    pub width: Option<u16>,

    /// Fixed terminal height (0 follows the client)
    #[arg(long)]
    pub height: Option<u16>,

    /// Ask clients to reconnect after the connection drops
    #[arg(short, long)]
    pub reconnect: bool,

    /// Seconds clients wait before reconnecting
    #[arg(long, value_name = "SECONDS")]
    pub reconnect_time: Option<u32>,

    /// Maximum concurrent connections (0 is unlimited)
    #[arg(long)]
    pub max_connection: Option<usize>,

    /// Accept one client and exit when it disconnects
    #[arg(long)]
    pub once: bool,

    /// Seconds to wait for a client before exiting (0 disables)
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Signal sent to the command when a session closes (name or number)
    #[arg(long, value_name = "SIGNAL")]
    pub close_signal: Option<String>,

    /// Seconds to wait after the close signal before sending SIGKILL
    #[arg(long, value_name = "SECONDS")]
    pub close_timeout: Option<u64>,

    /// Window title format
    #[arg(long, value_name = "FORMAT")]
    pub title_format: Option<String>,

    /// Bytes read from the terminal per output frame
    #[arg(long, value_name = "BYTES")]
    pub buffer_size: Option<usize>,

    /// Command to run, followed by its arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}
