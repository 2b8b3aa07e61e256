use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use webtty_core::{WebTtyConfig, DEFAULT_BUFFER_SIZE};
use webtty_pty::{
    CloseSignal, LocalCommandOptions, OptionsError, DEFAULT_CLOSE_TIMEOUT, DEFAULT_TITLE_FORMAT,
};

use crate::cli::Cli;

/// Errors from loading or validating the server configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("no command given")]
    MissingCommand,
    #[error("buffer size must be greater than zero")]
    ZeroBufferSize,
    #[error("reconnect time must be greater than zero")]
    ZeroReconnectTime,
    #[error("invalid preferences: {0}")]
    Preferences(#[source] serde_json::Error),
    #[error(transparent)]
    Backend(#[from] OptionsError),
}

/// Everything the server needs to run. Missing keys in the file take the
/// defaults below.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
    pub permit_write: bool,
    /// Token clients must send in their init message. Empty accepts an empty
    /// token.
    pub credential: String,
    pub permit_arguments: bool,
    pub width: u16,
    pub height: u16,
    pub reconnect: bool,
    /// Seconds, only announced when `reconnect` is set.
    pub reconnect_time: u32,
    /// 0 is unlimited.
    pub max_connection: usize,
    pub once: bool,
    /// Seconds to wait for a client before shutting down. 0 disables.
    pub timeout: u64,
    pub close_signal: String,
    /// Seconds.
    pub close_timeout: u64,
    pub title_format: String,
    pub buffer_size: usize,
    /// Terminal preferences passed to the client as-is.
    pub preferences: Option<toml::Table>,
    pub command: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 8080,
            permit_write: false,
            credential: String::new(),
            permit_arguments: false,
            width: 0,
            height: 0,
            reconnect: false,
            reconnect_time: 10,
            max_connection: 0,
            once: false,
            timeout: 0,
            close_signal: CloseSignal::default().to_string(),
            close_timeout: DEFAULT_CLOSE_TIMEOUT.as_secs(),
            title_format: DEFAULT_TITLE_FORMAT.to_string(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            preferences: None,
            command: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Defaults, then the `--config` file if given, then the flags.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = match &cli.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_cli(cli);
        config.validate()?;
        Ok(config)
    }

    /// Switches only ever turn features on, values replace the file's.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(address) = &cli.address {
            self.address = address.clone();
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
        self.permit_write |= cli.permit_write;
        if let Some(credential) = &cli.credential {
            self.credential = credential.clone();
        }
        self.permit_arguments |= cli.permit_arguments;
        if let Some(width) = cli.width {
            self.width = width;
        }
        if let Some(height) = cli.height {
            self.height = height;
        }
        self.reconnect |= cli.reconnect;
        if let Some(seconds) = cli.reconnect_time {
            self.reconnect_time = seconds;
        }
        if let Some(max) = cli.max_connection {
            self.max_connection = max;
        }
        self.once |= cli.once;
        if let Some(seconds) = cli.timeout {
            self.timeout = seconds;
        }
        if let Some(signal) = &cli.close_signal {
            self.close_signal = signal.clone();
        }
        if let Some(seconds) = cli.close_timeout {
            self.close_timeout = seconds;
        }
        if let Some(format) = &cli.title_format {
            self.title_format = format.clone();
        }
        if let Some(size) = cli.buffer_size {
            self.buffer_size = size;
        }
        if !cli.command.is_empty() {
            self.command = cli.command.clone();
        }
    }

    /// Reject anything that would only fail once a client connects.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command.is_empty() {
            return Err(ConfigError::MissingCommand);
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::ZeroBufferSize);
        }
        if self.reconnect && self.reconnect_time == 0 {
            return Err(ConfigError::ZeroReconnectTime);
        }
        self.backend_options()?.validate()?;
        self.webtty_config()?;
        Ok(())
    }

    pub fn backend_options(&self) -> Result<LocalCommandOptions, ConfigError> {
        Ok(LocalCommandOptions {
            close_signal: self.close_signal.parse()?,
            close_timeout: Duration::from_secs(self.close_timeout),
            title_format: self.title_format.clone(),
        })
    }

    pub fn webtty_config(&self) -> Result<WebTtyConfig, ConfigError> {
        let preferences = self
            .preferences
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(ConfigError::Preferences)?;

        Ok(WebTtyConfig {
            permit_write: self.permit_write,
            fixed_width: self.width,
            fixed_height: self.height,
            buffer_size: self.buffer_size,
            reconnect: self.reconnect.then_some(self.reconnect_time),
            preferences,
        })
    }
}
