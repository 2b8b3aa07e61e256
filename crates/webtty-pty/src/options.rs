use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::title::{TitleError, TitleTemplate};

/// How long `close()` waits for the command before escalating to SIGKILL.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_TITLE_FORMAT: &str = "WebTTY - {{ .Command }} ({{ .Hostname }})";

/// Signal names accepted in configuration, without the `SIG` prefix.
const NAMED_SIGNALS: &[(&str, i32)] = &[
    ("HUP", libc::SIGHUP),
    ("INT", libc::SIGINT),
    ("QUIT", libc::SIGQUIT),
    ("KILL", libc::SIGKILL),
    ("USR1", libc::SIGUSR1),
    ("USR2", libc::SIGUSR2),
    ("TERM", libc::SIGTERM),
];

/// Errors from validating backend options.
#[derive(Debug, thiserror::Error)]
pub enum OptionsError {
    #[error("unknown close signal `{0}`")]
    UnknownSignal(String),
    #[error("close timeout must be greater than zero")]
    ZeroCloseTimeout,
    #[error("title format string syntax error: {format:?}: {source}")]
    Title {
        format: String,
        #[source]
        source: TitleError,
    },
    #[error("no command given")]
    EmptyCommand,
}

/// The signal sent to a command when its session closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseSignal(i32);

impl CloseSignal {
    pub const HUP: Self = Self(libc::SIGHUP);
    pub const INT: Self = Self(libc::SIGINT);
    pub const TERM: Self = Self(libc::SIGTERM);
    pub const KILL: Self = Self(libc::SIGKILL);

    /// Accepts the classic signal numbers 1 through 31.
    pub fn from_raw(signal: i32) -> Result<Self, OptionsError> {
        if (1..32).contains(&signal) {
            Ok(Self(signal))
        } else {
            Err(OptionsError::UnknownSignal(signal.to_string()))
        }
    }

    pub fn as_raw(self) -> i32 {
        self.0
    }

    fn name(self) -> Option<&'static str> {
        NAMED_SIGNALS
            .iter()
            .find(|(_, number)| *number == self.0)
            .map(|(name, _)| *name)
    }
}

/// SIGHUP, the signal a terminal sends when its line hangs up.
impl Default for CloseSignal {
    fn default() -> Self {
        Self::HUP
    }
}

impl FromStr for CloseSignal {
    type Err = OptionsError;

    /// Parses `SIGHUP`, `HUP`, `hup` or `1`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(number) = trimmed.parse::<i32>() {
            return Self::from_raw(number);
        }

        let upper = trimmed.to_ascii_uppercase();
        let name = upper.strip_prefix("SIG").unwrap_or(&upper);
        NAMED_SIGNALS
            .iter()
            .find(|(known, _)| *known == name)
            .map(|(_, number)| Self(*number))
            .ok_or_else(|| OptionsError::UnknownSignal(s.to_string()))
    }
}

impl fmt::Display for CloseSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "SIG{name}"),
            None => write!(f, "signal {}", self.0),
        }
    }
}

/// Backend settings as configured by the user.
#[derive(Debug, Clone)]
pub struct LocalCommandOptions {
    pub close_signal: CloseSignal,
    pub close_timeout: Duration,
    pub title_format: String,
}

impl Default for LocalCommandOptions {
    fn default() -> Self {
        Self {
            close_signal: CloseSignal::default(),
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            title_format: DEFAULT_TITLE_FORMAT.to_string(),
        }
    }
}

impl LocalCommandOptions {
    /// Check the options once, before any session starts.
    pub fn validate(&self) -> Result<BackendSettings, OptionsError> {
        if self.close_timeout.is_zero() {
            return Err(OptionsError::ZeroCloseTimeout);
        }
        let title =
            TitleTemplate::parse(&self.title_format).map_err(|source| OptionsError::Title {
                format: self.title_format.clone(),
                source,
            })?;

        Ok(BackendSettings {
            close_signal: self.close_signal,
            close_timeout: self.close_timeout,
            title,
        })
    }
}

/// Validated, immutable settings shared by every `LocalCommand` of a factory.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub close_signal: CloseSignal,
    pub close_timeout: Duration,
    pub title: TitleTemplate,
}
