use super::{types::Config, ConfigError};

/// Largest accepted pipe read size.
const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Largest accepted concurrent stream limit. Each stream is a helper process.
pub const MAX_CONCURRENT_STREAMS: usize = 4096;

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Helper program is set
/// - The concurrent stream limit is within 1..=4096
/// - Chunk size is within 1..=16 MiB
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.helper.program.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "helper.program cannot be empty".to_string(),
        ));
    }

    if config.relay.max_concurrent_streams == 0
        || config.relay.max_concurrent_streams > MAX_CONCURRENT_STREAMS
    {
        return Err(ConfigError::ValidationError(format!(
            "relay.max_concurrent_streams must be between 1 and {}",
            MAX_CONCURRENT_STREAMS
        )));
    }

    if config.relay.chunk_size == 0 || config.relay.chunk_size > MAX_CHUNK_SIZE {
        return Err(ConfigError::ValidationError(format!(
            "relay.chunk_size must be between 1 and {} bytes",
            MAX_CHUNK_SIZE
        )));
    }

    Ok(())
}
