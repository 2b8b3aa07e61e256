use std::collections::HashMap;
use std::sync::Arc;

use crate::slave::{Slave, SlaveError};

/// Per-connection parameters, decoded from the client's query string.
/// A key may repeat, so every key maps to a list of values.
pub type Params = HashMap<String, Vec<String>>;

/// Builds one `Slave` per accepted connection.
///
/// Configuration is fixed when the factory is created; `new_slave` only
/// applies the per-connection parameters.
pub trait Factory: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    fn new_slave(&self, params: &Params) -> Result<Arc<dyn Slave>, SlaveError>;
}
