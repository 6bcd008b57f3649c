pub use app_error::{AppError, AppResult};
pub use self::config::{BufferConfig, ChatConfig, NetworkConfig, TransferConfig, ENV_PREFIX};
pub use shutdown::Shutdown;
pub use tracing_config::{setup_client_tracing, setup_local_tracing, setup_server_tracing};

mod app_error;
mod config;
mod shutdown;
mod tracing_config;
