use common::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("submission {0} not found")]
    MissingSubmission(i32),

    #[error("mq error: {0}")]
    Mq(String),
}

pub type Result<T> = std::result::Result<T, JudgeError>;
