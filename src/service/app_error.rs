// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

pub type AppResult<T> = Result<T, AppError>;

/// Every failure in stonechat is scoped to the connection or session that produced it.
/// The reactor turns these into a silent close, a `LoginRefused` or a `KoPrivate`;
/// only configuration and startup errors ever reach `main`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// malformed field at construction or decode time
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("login already taken: {0}")]
    LoginTaken(String),

    #[error("transport closed by peer")]
    TransportClosed,

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("session id collision: {0}")]
    SessionIdCollision(u64),

    #[error("no private session is waiting for id {0}")]
    UnmatchedPrivateLogin(u64),

    /// general errors
    #[error("illegal state: {0}")]
    IllegalStateError(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("config file error: {0}")]
    ConfigFileError(#[from] config::ConfigError),
}
