use std::sync::Arc;

use crate::config::BrokerConfig;
use crate::error::ConfigError;

use super::{
    paper::PaperBroker,
    traits::{AccountProvider, ExecutionBackend},
};

/// The same broker seen through both interfaces the pipeline needs.
#[derive(Clone)]
pub struct BackendHandle {
    pub execution: Arc<dyn ExecutionBackend>,
    pub accounts: Arc<dyn AccountProvider>,
}

pub fn build_backend(config: &BrokerConfig) -> Result<BackendHandle, ConfigError> {
    match config.broker_type.to_lowercase().as_str() {
        "paper" | "mock" => {
            let broker = Arc::new(PaperBroker::new(config.paper.clone()));
            Ok(BackendHandle {
                execution: broker.clone(),
                accounts: broker,
            })
        }
        other => Err(ConfigError::UnknownBroker(other.to_string())),
    }
}
