//! Runtime for the loadx engine: HTTP execution with per-VU cookie jars,
//! the subprocess evaluator gateway, the retry/mutation loop, the variable
//! engine, runtime assertions, the load driver, and result aggregation.

pub mod checks;
pub mod cookies;
pub mod evaluator;
pub mod http;
pub mod orchestrator;
pub mod runner;
pub mod stats;
pub mod vars;

mod error;

pub use error::{Error, Result};
pub use evaluator::{EvaluatorGateway, GatewayOutcome, default_verdict};
pub use http::HttpExecutor;
pub use orchestrator::{RequestOutcome, RetryPolicy, run_request};
pub use runner::{
    CancelSignal, PROGRESS_CAPACITY, ProgressEvent, ProgressSender, Runner, progress_channel,
};
pub use stats::{LatencySummary, RunStats, RunSummary, VuSummary};
