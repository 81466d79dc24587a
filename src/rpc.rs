//! JSON-RPC plumbing between a coordinator and its workers: the server-side
//! module, the worker-side client, client options, retry policy, and metrics.

pub mod client;
pub mod metrics;
pub mod options;
mod retry;
pub mod server;

pub use client::{CoordinatorClient, RpcError};
pub use metrics::RpcMetricsSnapshot;
pub use options::RpcClientOptions;
pub use server::coordinator_module;

pub const NEXT_UNIT_METHOD: &str = "scan_nextUnit";
pub const LOGGER_METHOD: &str = "scan_logger";
pub const SESSION_METHOD: &str = "scan_session";
pub const PROGRESS_METHOD: &str = "scan_progress";

/// Error code returned once the scan has terminated.
pub const TERMINATED_CODE: i32 = -32001;
/// Error code for store failures.
pub const SCAN_FAILED_CODE: i32 = -32002;
