//! Exposes a [`Coordinator`] as a JSON-RPC module. Every registered method
//! dispatches onto the same shared coordinator.

use super::{
    LOGGER_METHOD, NEXT_UNIT_METHOD, PROGRESS_METHOD, SCAN_FAILED_CODE, SESSION_METHOD,
    TERMINATED_CODE,
};
use crate::coordinator::{Coordinator, LogRecord, ScanError};
use crate::store::RecordStore;
use anyhow::{Context, Result};
use jsonrpsee::types::{ErrorObject, ErrorObjectOwned};
use jsonrpsee::RpcModule;
use std::sync::Arc;

pub fn coordinator_module<S: RecordStore>(
    coordinator: Arc<Coordinator<S>>,
) -> Result<RpcModule<Arc<Coordinator<S>>>> {
    let mut module = RpcModule::new(coordinator);

    module
        .register_async_method(NEXT_UNIT_METHOD, |_params, coordinator, _| async move {
            coordinator.next_unit().await.map_err(to_error_object)
        })
        .with_context(|| format!("failed to register {NEXT_UNIT_METHOD}"))?;

    module
        .register_async_method(LOGGER_METHOD, |params, coordinator, _| async move {
            let record: LogRecord = params.one()?;
            coordinator.log(&record);
            Ok::<(), ErrorObjectOwned>(())
        })
        .with_context(|| format!("failed to register {LOGGER_METHOD}"))?;

    module
        .register_method(SESSION_METHOD, |_params, coordinator, _| {
            Ok::<_, ErrorObjectOwned>(coordinator.session())
        })
        .with_context(|| format!("failed to register {SESSION_METHOD}"))?;

    module
        .register_method(PROGRESS_METHOD, |_params, coordinator, _| {
            Ok::<_, ErrorObjectOwned>(coordinator.progress())
        })
        .with_context(|| format!("failed to register {PROGRESS_METHOD}"))?;

    Ok(module)
}

fn to_error_object(err: anyhow::Error) -> ErrorObjectOwned {
    if matches!(err.downcast_ref::<ScanError>(), Some(ScanError::Terminated)) {
        return ErrorObject::owned(TERMINATED_CODE, err.to_string(), None::<()>);
    }
    tracing::warn!(error = %format!("{err:#}"), "coordinator call failed");
    ErrorObject::owned(SCAN_FAILED_CODE, format!("{err:#}"), None::<()>)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{LogLevel, PullSignal, SessionInfo};
    use crate::runtime::config::ScanConfig;
    use crate::store::MemoryStore;
    use jsonrpsee::rpc_params;

    async fn module_over(
        ids: std::ops::RangeInclusive<u64>,
    ) -> RpcModule<Arc<Coordinator<MemoryStore>>> {
        let store = Arc::new(MemoryStore::with_ids(ids));
        let config = ScanConfig::builder()
            .queue_size(2)
            .build()
            .expect("config should build");
        let coordinator = Coordinator::open(store, config)
            .await
            .expect("coordinator should open");
        coordinator_module(Arc::new(coordinator)).expect("module should register")
    }

    #[tokio::test]
    async fn next_unit_serves_ids_then_reports_termination() {
        let module = module_over(1..=2).await;

        let first: PullSignal = module
            .call(NEXT_UNIT_METHOD, rpc_params![])
            .await
            .expect("first pull");
        let second: PullSignal = module
            .call(NEXT_UNIT_METHOD, rpc_params![])
            .await
            .expect("second pull");
        assert_eq!((first, second), (PullSignal::Unit(1), PullSignal::Unit(2)));

        let err = module
            .call::<_, PullSignal>(NEXT_UNIT_METHOD, rpc_params![])
            .await
            .expect_err("exhausted scan should terminate");
        assert!(
            format!("{err:?}").contains(&TERMINATED_CODE.to_string()),
            "unexpected error: {err:?}"
        );
    }

    #[tokio::test]
    async fn session_and_logger_are_exposed() {
        let module = module_over(1..=3).await;

        let session: SessionInfo = module
            .call(SESSION_METHOD, rpc_params![])
            .await
            .expect("session call");
        assert_eq!(session.limit, 3);
        assert_eq!(session.locked_queue_wait_ms, 1_000);

        let record = LogRecord::new(LogLevel::Info, "hello").with_worker("w1");
        module
            .call::<_, ()>(LOGGER_METHOD, rpc_params![record])
            .await
            .expect("logger call");
    }
}
