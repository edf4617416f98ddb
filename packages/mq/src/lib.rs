//! Thin wrapper over the Redis-backed `broccoli_queue` broker.
//!
//! The rest of the workspace talks to `Mq` and
//! the re-exported message/error types, so swapping brokers later
//! only touches this crate.

pub mod error;

pub use broccoli_queue::{
    brokers::broker::BrokerMessage,
    error::BroccoliError,
    queue::{BroccoliQueue, ConsumeOptions},
};

pub use error::MqError;

pub type Mq = BroccoliQueue;

pub struct MqConfig {
    pub url: String,
    pub pool_size: u8,
}

/// Connect to the broker with a pooled connection.
pub async fn connect(config: &MqConfig) -> Result<Mq, MqError> {
    BroccoliQueue::builder(&config.url)
        .pool_connections(config.pool_size)
        .build()
        .await
        .map_err(MqError::from)
}
