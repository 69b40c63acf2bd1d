use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no tokio runtime to run effects on: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
