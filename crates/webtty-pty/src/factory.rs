use std::sync::Arc;

use log::info;
use webtty_core::{Factory, Params, Slave, SlaveError};

use crate::local_command::LocalCommand;
use crate::options::{BackendSettings, LocalCommandOptions, OptionsError};

/// Query parameter whose values are appended to the base command.
const ARGS_PARAM: &str = "args";

/// Spawns a fresh [`LocalCommand`] for every connection.
pub struct LocalCommandFactory {
    command: Vec<String>,
    settings: BackendSettings,
}

impl LocalCommandFactory {
    pub fn new(command: Vec<String>, options: &LocalCommandOptions) -> Result<Self, OptionsError> {
        if command.is_empty() {
            return Err(OptionsError::EmptyCommand);
        }
        let settings = options.validate()?;
        Ok(Self { command, settings })
    }

    /// The base command and its fixed arguments.
    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// The base command followed by any `args` the client supplied.
    fn argv(&self, params: &Params) -> Vec<String> {
        let mut argv = self.command.clone();
        if let Some(extra) = params.get(ARGS_PARAM) {
            argv.extend(extra.iter().cloned());
        }
        argv
    }
}

impl Factory for LocalCommandFactory {
    fn name(&self) -> &'static str {
        "local command"
    }

    fn new_slave(&self, params: &Params) -> Result<Arc<dyn Slave>, SlaveError> {
        let argv = self.argv(params);
        let command = LocalCommand::new(&argv, self.settings.clone())?;
        info!("Spawned {argv:?} with pid {:?}", command.pid());
        Ok(Arc::new(command))
    }
}
