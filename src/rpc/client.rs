//! Worker-side handle on a remote coordinator. Wraps a jsonrpsee HTTP client
//! with per-call timeouts, retry/backoff for transport failures, and metrics.

use super::metrics::{RpcMetrics, RpcMetricsSnapshot};
use super::options::RpcClientOptions;
use super::retry::{retry_with_backoff, RetryBackoff, RetryDisposition};
use super::{LOGGER_METHOD, NEXT_UNIT_METHOD, PROGRESS_METHOD, SESSION_METHOD, TERMINATED_CODE};
use crate::coordinator::{LogRecord, PullSignal, ScanError, ScanProgress, SessionInfo};
use crate::worker::UnitSource;
use anyhow::{anyhow, Context, Result};
use futures::future::BoxFuture;
use jsonrpsee::core::client::{ClientT, Error as JsonRpcError};
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::time::{timeout, Instant};

#[derive(Debug)]
pub enum RpcError {
    Timeout {
        method: &'static str,
    },
    /// The coordinator answered with a JSON-RPC error other than termination.
    Call {
        method: &'static str,
        code: i32,
        message: String,
    },
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcError::Timeout { method } => write!(f, "rpc method {method} timed out"),
            RpcError::Call {
                method,
                code,
                message,
            } => write!(f, "rpc {method} call failed (code={code}, message={message})"),
        }
    }
}

impl std::error::Error for RpcError {}

#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    endpoint: Arc<String>,
    client: HttpClient,
    options: RpcClientOptions,
    metrics: Arc<RpcMetrics>,
}

impl UnitSource for CoordinatorClient {
    fn next_unit(&self) -> BoxFuture<'_, Result<PullSignal>> {
        Box::pin(CoordinatorClient::next_unit(self))
    }

    fn session(&self) -> BoxFuture<'_, Result<SessionInfo>> {
        Box::pin(CoordinatorClient::session(self))
    }

    fn log(&self, record: LogRecord) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { CoordinatorClient::log(self, &record).await })
    }
}

impl CoordinatorClient {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Self::with_options(url, RpcClientOptions::default())
    }

    pub fn with_options(url: impl Into<String>, options: RpcClientOptions) -> Result<Self> {
        options.validate()?;

        let endpoint = url.into();
        let max_request_body_size = options.max_request_body_bytes.min(u32::MAX as usize) as u32;
        let max_response_body_size = options.max_response_body_bytes.min(u32::MAX as usize) as u32;

        let client = HttpClientBuilder::default()
            .request_timeout(options.request_timeout)
            .max_concurrent_requests(options.max_concurrent_requests)
            .max_request_size(max_request_body_size)
            .max_response_size(max_response_body_size)
            .build(&endpoint)
            .map_err(|err| anyhow!("failed to build coordinator client: {err}"))?;

        Ok(Self {
            endpoint: Arc::new(endpoint),
            client,
            options,
            metrics: Arc::new(RpcMetrics::default()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn metrics(&self) -> RpcMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// A single pull. A terminated coordinator surfaces as
    /// [`ScanError::Terminated`].
    pub async fn next_unit(&self) -> Result<PullSignal> {
        self.call(NEXT_UNIT_METHOD, ArrayParams::new()).await
    }

    pub async fn session(&self) -> Result<SessionInfo> {
        self.call(SESSION_METHOD, ArrayParams::new()).await
    }

    pub async fn progress(&self) -> Result<ScanProgress> {
        self.call(PROGRESS_METHOD, ArrayParams::new()).await
    }

    pub async fn log(&self, record: &LogRecord) -> Result<()> {
        let mut params = ArrayParams::new();
        params
            .insert(record)
            .context("failed to serialize log record")?;
        self.call(LOGGER_METHOD, params).await
    }

    async fn call<T>(&self, method: &'static str, params: ArrayParams) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let backoff = RetryBackoff::new(self.options.initial_backoff, self.options.max_backoff)
            .with_max_attempts(self.options.max_attempts);

        retry_with_backoff(
            backoff,
            |_attempt| self.call_once(method, params.clone()),
            |attempt, delay, err, will_retry| {
                if will_retry {
                    tracing::warn!(
                        method,
                        attempt,
                        backoff_ms = delay.as_millis() as u64,
                        error = %err,
                        "coordinator call failed; retrying"
                    );
                } else {
                    tracing::error!(
                        method,
                        attempt,
                        error = %err,
                        "coordinator call failed; giving up"
                    );
                }
            },
            |_, err| classify(err),
        )
        .await
    }

    async fn call_once<T>(&self, method: &'static str, params: ArrayParams) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let start = Instant::now();
        let outcome = timeout(
            self.options.request_timeout,
            self.client.request::<T, _>(method, params),
        )
        .await;
        let elapsed = start.elapsed();

        match outcome {
            Err(_) | Ok(Err(JsonRpcError::RequestTimeout)) => {
                self.metrics.record_timeout(elapsed);
                Err(RpcError::Timeout { method }.into())
            }
            Ok(Ok(value)) => {
                self.metrics.record_success(elapsed);
                Ok(value)
            }
            Ok(Err(JsonRpcError::Call(object))) if object.code() == TERMINATED_CODE => {
                // Termination counts as an answered call.
                self.metrics.record_success(elapsed);
                Err(ScanError::Terminated.into())
            }
            Ok(Err(err)) => {
                self.metrics.record_failure(elapsed);
                Err(map_rpc_error(method, err))
            }
        }
    }
}

fn map_rpc_error(method: &'static str, err: JsonRpcError) -> anyhow::Error {
    match err {
        JsonRpcError::Call(object) => RpcError::Call {
            method,
            code: object.code(),
            message: object.message().to_string(),
        }
        .into(),
        other => anyhow!("rpc {method} call failed: {other}"),
    }
}

fn classify(err: &anyhow::Error) -> RetryDisposition {
    if err.downcast_ref::<ScanError>().is_some() {
        return RetryDisposition::Abort;
    }
    match err.downcast_ref::<RpcError>() {
        Some(RpcError::Call { .. }) => RetryDisposition::Abort,
        Some(RpcError::Timeout { .. }) | None => RetryDisposition::Retry,
    }
}
