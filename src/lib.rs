pub mod coordinator;
pub mod rpc;
pub mod runtime;
pub mod store;
pub mod worker;

pub use coordinator::{
    completion_hook, CompletionHook, Coordinator, LogLevel, LogRecord, PullSignal, ScanError,
    ScanPhase, ScanProgress, ScanSummary, SessionInfo,
};
pub use rpc::{CoordinatorClient, RpcClientOptions, RpcError, RpcMetricsSnapshot};
pub use runtime::config::{ScanConfig, ScanConfigBuilder, ScanConfigParams};
pub use runtime::fatal::FatalErrorHandler;
pub use runtime::runner::CoordinatorService;
pub use runtime::telemetry::{init_tracing, ScanTelemetry, TelemetrySnapshot};
pub use store::{
    FindQuery, HydrateOptions, Identified, MemoryRecord, MemoryStore, RecordStore,
    ScanDescriptor, UnitId,
};
pub use worker::{
    PoolReport, RecordingSleeper, Sleeper, TokioSleeper, UnitSource, WaitPolicy, WorkerPool,
    WorkerStub,
};
