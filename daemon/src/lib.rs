pub mod app;
pub mod broadcast;
pub mod capture;
pub mod config;
pub mod generation;
pub mod orchestrator;
pub mod rate_limit;
pub mod rules;
pub mod server;

pub use broadcast::{BroadcastHub, ClientSink};
pub use capture::{CaptureWorker, LatestSlot};
pub use generation::{GenerationPipeline, GenerationRequest, GenerationResult};
pub use orchestrator::Orchestrator;
pub use rate_limit::SubmitRateLimiter;
pub use rules::RuleEngine;
