//! Worker side of a scan:
//! - `source`: the coordinator operations a worker consumes
//! - `stub`: per-worker iteration, backoff, and hydration
//! - `clock`: injectable sleeping for backoff waits
//! - `pool`: several stubs driven concurrently with shared failure handling

mod clock;
mod pool;
mod source;
mod stub;


pub use clock::{RecordingSleeper, Sleeper, TokioSleeper};
pub use pool::{PoolReport, WorkerPool};
pub use source::UnitSource;
pub use stub::{WaitPolicy, WorkerStub};
