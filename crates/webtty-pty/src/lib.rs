//! webtty-pty: runs a local command on a pseudo-terminal and exposes it as a
//! [`webtty_core::Slave`].
//!
//! # Architecture
//!
//! - [`LocalCommand`]: One spawned process plus its pty (read, write, resize,
//!   title, signal-escalating close).
//! - [`LocalCommandFactory`]: Spawns a `LocalCommand` per connection from a
//!   fixed base command.
//! - [`LocalCommandOptions`]: User-facing settings, validated once into
//!   [`BackendSettings`].
//! - [`TitleTemplate`]: The window title format.
//!
//! Signal delivery and pty polling use POSIX APIs, so this crate targets unix.

pub mod factory;
pub mod local_command;
pub mod options;
pub mod title;

pub use factory::LocalCommandFactory;
pub use local_command::LocalCommand;
pub use options::{
    BackendSettings, CloseSignal, LocalCommandOptions, OptionsError, DEFAULT_CLOSE_TIMEOUT,
    DEFAULT_TITLE_FORMAT,
};
pub use title::{TitleError, TitleTemplate, TitleVars};
