pub mod distributor;
pub mod engine;
pub mod failure_logger;
pub mod models;
pub mod queue;
pub mod worker;

pub use distributor::DataDistributor;
pub use engine::PollingEngine;
pub use failure_logger::PollingFailureLogger;
pub use models::{Category, PollingGroup, PollingMode, PollingSample, PollingStatus, ThreadState};
pub use queue::DataQueue;
pub use worker::PollingWorker;
