use std::io;
use thiserror::Error;

use crate::client::ClientError;
use crate::config::ConfigError;
use crate::session::RemoteError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Session(#[from] RemoteError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("logging initialization failed: {0}")]
    Logging(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("terminal runtime error: {0}")]
    Runtime(String),
}

impl From<ClientError> for CliError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Io(err) => CliError::Io(err),
            other => CliError::Runtime(other.to_string()),
        }
    }
}
