use crate::runtime::telemetry::TelemetrySnapshot;
use anyhow::Result;
use futures::future::BoxFuture;
use std::future::Future;

/// Final cursor state handed to the completion hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    pub total: u64,
    pub offset: u64,
    pub passes: u64,
    pub telemetry: TelemetrySnapshot,
}

/// Callback invoked exactly once when a scan ends without rescan or vigilant growth.
pub type CompletionHook = Box<dyn FnOnce(ScanSummary) -> BoxFuture<'static, Result<()>> + Send>;

/// Boxes an async closure into a [`CompletionHook`].
pub fn completion_hook<F, Fut>(hook: F) -> CompletionHook
where
    F: FnOnce(ScanSummary) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Box::new(move |summary| Box::pin(hook(summary)))
}
