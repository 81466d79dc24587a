use crate::coordinator::{Coordinator, LogRecord, PullSignal, SessionInfo};
use crate::store::RecordStore;
use anyhow::Result;
use futures::future::BoxFuture;

/// The coordinator operations a worker consumes, independent of whether the
/// coordinator lives in-process or behind the invocation channel.
pub trait UnitSource: Send + Sync {
    fn next_unit(&self) -> BoxFuture<'_, Result<PullSignal>>;

    fn session(&self) -> BoxFuture<'_, Result<SessionInfo>>;

    fn log(&self, record: LogRecord) -> BoxFuture<'_, Result<()>>;
}

impl<S: RecordStore> UnitSource for Coordinator<S> {
    fn next_unit(&self) -> BoxFuture<'_, Result<PullSignal>> {
        Box::pin(Coordinator::next_unit(self))
    }

    fn session(&self) -> BoxFuture<'_, Result<SessionInfo>> {
        let session = Coordinator::session(self);
        Box::pin(async move { Ok(session) })
    }

    fn log(&self, record: LogRecord) -> BoxFuture<'_, Result<()>> {
        Coordinator::log(self, &record);
        Box::pin(async { Ok(()) })
    }
}
