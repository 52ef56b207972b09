//! # Driver Configuration
//!
//! Sizing knobs for the queue, handle table, promise set and buffer pool.
//! Loaded once at startup from TOML; every field has a default matching the
//! constants the driver shipped with.

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use basalt_core::{MemoryContext, FREE_NODE_SIZE};

/// Errors raised while loading a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The TOML text did not parse or did not match the schema.
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// The parsed values cannot size a working driver.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Sizing configuration for a [`RenderDriver`](crate::driver::RenderDriver).
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DriverConfig {
    /// Bytes per command buffer arena (two are created).
    pub command_arena_size: usize,
    /// Maximum number of live handles.
    pub handle_capacity: usize,
    /// Maximum map commands per frame cycle.
    pub promise_capacity: usize,
    /// Blocks per bin in the shared buffer pool.
    pub pool_bin_blocks: usize,
    /// Bytes per pool block; also the largest creatable buffer.
    pub pool_block_size: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            command_arena_size: 1024 * 1024,
            handle_capacity: 65_536,
            promise_capacity: 256,
            pool_bin_blocks: 16,
            pool_block_size: 1024 * 1024,
        }
    }
}

impl DriverConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Builds the allocator context this configuration describes. Several
    /// drivers may share one context; backends draw their buffer storage
    /// from its pool.
    #[must_use]
    pub fn memory_context(&self) -> Arc<MemoryContext> {
        MemoryContext::new(self.pool_bin_blocks, self.pool_block_size)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.command_arena_size == 0 || self.command_arena_size % FREE_NODE_SIZE != 0 {
            return Err(ConfigError::Invalid(format!(
                "command_arena_size must be a non-zero multiple of {FREE_NODE_SIZE}"
            )));
        }
        if self.handle_capacity == 0 {
            return Err(ConfigError::Invalid(
                "handle_capacity must be non-zero".to_owned(),
            ));
        }
        if self.promise_capacity == 0 {
            return Err(ConfigError::Invalid(
                "promise_capacity must be non-zero".to_owned(),
            ));
        }
        if self.pool_bin_blocks == 0 || self.pool_block_size == 0 {
            return Err(ConfigError::Invalid(
                "pool geometry must be non-zero".to_owned(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_yields_defaults() {
        let config = DriverConfig::from_toml("").unwrap();
        assert_eq!(config, DriverConfig::default());
    }

    #[test]
    fn test_partial_override() {
        let config = DriverConfig::from_toml("handle_capacity = 128\n").unwrap();
        assert_eq!(config.handle_capacity, 128);
        assert_eq!(
            config.command_arena_size,
            DriverConfig::default().command_arena_size
        );
    }

    #[test]
    fn test_memory_context_follows_pool_geometry() {
        let config = DriverConfig::from_toml("pool_block_size = 1024\n").unwrap();
        let memory = config.memory_context();
        assert_eq!(memory.pool().block_size(), 1024);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        assert!(matches!(
            DriverConfig::from_toml("frame_rate = 60\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_misaligned_arena_is_rejected() {
        assert!(matches!(
            DriverConfig::from_toml("command_arena_size = 100\n"),
            Err(ConfigError::Invalid(_))
        ));
    }
}
