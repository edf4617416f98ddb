pub mod config;
pub mod consumer;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod publisher;
pub mod queue;
pub mod sandbox;

pub use config::{JudgeAppConfig, SandboxKind, WorkerSettings};
pub use consumer::{ConsumerSettings, run_worker};
pub use error::{JudgeError, Result};
pub use orchestrator::{JudgeOrchestrator, JudgeSettings};
pub use publisher::{BroadcastPublisher, FanoutPublisher, MqStatusPublisher, StatusPublisher};
pub use queue::JudgeQueue;
pub use sandbox::{IsolateSandbox, ProcessSandbox, Sandbox, SandboxSession};
