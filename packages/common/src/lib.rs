pub mod config;
pub mod dlq;
pub mod job;
pub mod logs;
pub mod model;
pub mod retry;
pub mod status;
pub mod store;
pub mod update;

pub use model::{Language, Problem, Submission, TestCase};
pub use status::SubmissionStatus;
