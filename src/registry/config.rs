//! Registry configuration

use std::path::PathBuf;
use std::time::Duration;

use crate::env;
use crate::error::{Error, Result};
use crate::transcoder::TranscoderCommand;

/// Configuration for [`StreamRegistry`](super::StreamRegistry)
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Transcoder launched for each stream
    pub command: TranscoderCommand,

    /// How long a transcoder gets to exit after the interrupt before it is
    /// killed
    pub kill_timeout: Duration,

    /// Maximum size of a chunk read from transcoder output
    pub chunk_size: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            command: TranscoderCommand::default(),
            kill_timeout: Duration::from_secs(5),
            chunk_size: 64 * 1024, // 64KB
        }
    }
}

impl RegistryConfig {
    /// Load from the process environment
    ///
    /// `TRANSCODER_BIN`, `TRANSCODER_ARGS`, `KILL_TIMEOUT_MS`, `CHUNK_SIZE`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using a custom variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(program) = env::parse::<PathBuf, _>(&lookup, "TRANSCODER_BIN")? {
            config.command.program = program;
        }
        if let Some(template) = lookup("TRANSCODER_ARGS").filter(|t| !t.trim().is_empty()) {
            config.command = config.command.with_arg_template(&template);
            if !config.command.uses_source() {
                return Err(Error::Config(format!(
                    "TRANSCODER_ARGS={:?}: template must contain {}",
                    template,
                    crate::transcoder::command::SOURCE_PLACEHOLDER
                )));
            }
        }
        if let Some(ms) = env::parse::<u64, _>(&lookup, "KILL_TIMEOUT_MS")? {
            config.kill_timeout = Duration::from_millis(ms);
        }
        if let Some(size) = env::parse::<usize, _>(&lookup, "CHUNK_SIZE")? {
            config = config.chunk_size(size);
        }

        Ok(config)
    }

    /// Set the transcoder command
    pub fn command(mut self, command: TranscoderCommand) -> Self {
        self.command = command;
        self
    }

    /// Set the interrupt-to-kill timeout
    pub fn kill_timeout(mut self, timeout: Duration) -> Self {
        self.kill_timeout = timeout;
        self
    }

    /// Set the output chunk size (at least 1 byte)
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }
}
