pub mod config;
pub mod metrics;
pub mod relay;
pub mod testing;

pub use config::{
    load_config, load_config_from_env, load_config_from_str, validate_config, Config,
    ConfigError, HelperConfig, RelayConfig, ServerConfig,
};
pub use relay::{
    HelperCommand, RelayError, RelayStream, SessionInfo, SessionRegistry, SessionState,
    StreamRelay, DEFAULT_FILE_INDEX,
};
