//! Client-side stress testing for activity backend endpoints: rounds of
//! concurrent HTTP requests, per-request samples, and a statistical report.

pub mod config;
pub mod driver;
pub mod error;
pub mod executor;
pub mod session;
pub mod stats;
pub mod types;
pub mod url_builder;

#[cfg(test)]
mod test_support;

pub use config::{ExecutorSettings, SessionSettings, Settings, TargetEnvironment};
pub use error::{ExecuteError, Result, StressError};
pub use executor::{HttpExecutor, PreparedRequest, RequestExecutor};
pub use session::TestSession;
pub use types::{
    ApiDescriptor, HttpMethod, LatencyStats, ProgressSnapshot, RequestResult, SessionView,
    TestConfiguration, TestResult, TestStatus, Termination,
};
