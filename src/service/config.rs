use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{AppError, AppResult};
use crate::protocol::MAX_FRAME_SIZE;

pub const ENV_PREFIX: &str = "STONECHAT";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct NetworkConfig {
    pub ip: String,
    pub port: u16,
    /// Listener for private relay connections. `None` (or the same value as
    /// `port`) lets the ordinary listener accept them as well.
    pub private_port: Option<u16>,
    /// Capacity of the console → reactor hand-off queue.
    pub handoff_capacity: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            ip: "0.0.0.0".to_string(),
            port: 7777,
            private_port: None,
            handoff_capacity: 100,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct BufferConfig {
    /// Capacity of both the input and the output buffer of every connection.
    pub connection_buffer_size: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        BufferConfig {
            connection_buffer_size: 4 * 1024,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct TransferConfig {
    /// Largest payload unit accepted over a private link (text or file body).
    pub max_payload_size: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig {
            max_payload_size: 64 * 1024,
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChatConfig {
    pub network: NetworkConfig,
    pub buffer: BufferConfig,
    pub transfer: TransferConfig,
}

impl ChatConfig {
    /// Builds the configuration from the built-in defaults, an optional toml file and
    /// `STONECHAT_<SECTION>__<KEY>` environment variables, in increasing priority.
    pub fn set_up_config<P: AsRef<Path>>(path: Option<P>) -> AppResult<ChatConfig> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            let path_str = path
                .as_ref()
                .to_str()
                .ok_or(AppError::InvalidValue(format!(
                    "config file path: {}",
                    path.as_ref().to_string_lossy()
                )))?;
            builder = builder.add_source(config::File::with_name(path_str));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let chat_config: ChatConfig = config.try_deserialize()?;
        chat_config.validate()?;
        Ok(chat_config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.buffer.connection_buffer_size < MAX_FRAME_SIZE {
            return Err(AppError::InvalidValue(format!(
                "connection buffer size {} can not hold a frame of {} bytes",
                self.buffer.connection_buffer_size, MAX_FRAME_SIZE
            )));
        }
        if self.network.handoff_capacity == 0 {
            return Err(AppError::InvalidValue(
                "hand-off queue capacity must be positive".to_string(),
            ));
        }
        if self.transfer.max_payload_size == 0 {
            return Err(AppError::InvalidValue(
                "max payload size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Port clients use to open private relay connections.
    pub fn relay_port(&self) -> u16 {
        self.network.private_port.unwrap_or(self.network.port)
    }
}
