use std::sync::Arc;
use magnetstream_core::{Config, StreamRelay};

/// Shared application state
pub struct AppState {
    config: Config,
    relay: Arc<StreamRelay>,
}

impl AppState {
    pub fn new(config: Config, relay: Arc<StreamRelay>) -> Self {
        Self { config, relay }
    }

    /// Builds the relay from the helper and relay sections of `config`.
    pub fn from_config(config: Config) -> Self {
        let relay = Arc::new(StreamRelay::new(
            config.helper.clone(),
            config.relay.clone(),
        ));
        Self::new(config, relay)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn relay(&self) -> &Arc<StreamRelay> {
        &self.relay
    }
}
