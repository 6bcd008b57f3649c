pub mod client;
pub mod network;
pub mod protocol;
pub mod server;
mod service;

pub use service::{
    setup_client_tracing, setup_local_tracing, setup_server_tracing, AppError, AppResult,
    BufferConfig, ChatConfig, NetworkConfig, Shutdown, TransferConfig, ENV_PREFIX,
};
