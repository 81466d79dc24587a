use crate::coordinator::Coordinator;
use crate::rpc::server::coordinator_module;
use crate::runtime::telemetry::spawn_metrics_reporter;
use crate::store::RecordStore;
use anyhow::{Context, Result};
use jsonrpsee::server::{Server, ServerHandle};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const DEFAULT_TERMINATION_GRACE: Duration = Duration::from_secs(2);

/// Hosts a [`Coordinator`] behind a JSON-RPC server and manages its lifecycle.
///
/// Once the scan terminates the server keeps answering for the termination
/// grace period so polling workers observe the termination error instead of a
/// refused connection, then shuts down.
pub struct CoordinatorService<S: RecordStore> {
    coordinator: Arc<Coordinator<S>>,
    listen_addr: SocketAddr,
    termination_grace: Duration,
    shutdown: CancellationToken,
    running: Option<RunningService>,
}

struct RunningService {
    local_addr: SocketAddr,
    server: ServerHandle,
    reporter: JoinHandle<()>,
}

impl<S: RecordStore> CoordinatorService<S> {
    pub fn new(coordinator: Arc<Coordinator<S>>, listen_addr: SocketAddr) -> Self {
        Self {
            coordinator,
            listen_addr,
            termination_grace: DEFAULT_TERMINATION_GRACE,
            shutdown: CancellationToken::new(),
            running: None,
        }
    }

    pub fn with_termination_grace(mut self, grace: Duration) -> Self {
        self.termination_grace = grace;
        self
    }

    pub fn coordinator(&self) -> Arc<Coordinator<S>> {
        Arc::clone(&self.coordinator)
    }

    /// Returns a clone of the root shutdown token so external callers can integrate
    /// with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Address the server is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.local_addr)
    }

    /// `http://` URL workers connect to, once started.
    pub fn endpoint(&self) -> Option<String> {
        self.local_addr().map(|addr| format!("http://{addr}"))
    }

    /// Binds the listen address and starts serving. Idempotent.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        if let Some(running) = &self.running {
            return Ok(running.local_addr);
        }

        let server = Server::builder()
            .build(self.listen_addr)
            .await
            .with_context(|| format!("failed to bind coordinator service on {}", self.listen_addr))?;
        let local_addr = server
            .local_addr()
            .context("failed to read coordinator service address")?;
        let module = coordinator_module(Arc::clone(&self.coordinator))?;
        let handle = server.start(module);

        let reporter = spawn_metrics_reporter(
            Arc::clone(&self.coordinator),
            self.shutdown.child_token(),
            self.coordinator.config().metrics_interval(),
        );

        tracing::info!(%local_addr, "coordinator service listening");
        self.running = Some(RunningService {
            local_addr,
            server: handle,
            reporter,
        });
        Ok(local_addr)
    }

    /// Stops the server and the metrics reporter.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };

        self.shutdown.cancel();
        if running.server.stop().is_err() {
            tracing::debug!("coordinator server already stopped");
        }
        running.server.stopped().await;
        if let Err(err) = running.reporter.await {
            tracing::warn!(error = %err, "metrics reporter task failed");
        }

        tracing::info!(local_addr = %running.local_addr, "coordinator service stopped");
        self.shutdown = CancellationToken::new();
        Ok(())
    }

    /// Serves until the scan terminates or the shutdown token is cancelled,
    /// then stops. Returns the scan's fatal error, if one was captured.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;
        let shutdown = self.shutdown.clone();
        self.serve_until(shutdown.cancelled()).await
    }

    /// Like [`run`](Self::run), but also stops on Ctrl-C (SIGINT).
    pub async fn run_until_ctrl_c(&mut self) -> Result<()> {
        self.start().await?;
        tracing::info!("coordinator service started; waiting for scan termination or Ctrl-C");

        let shutdown = self.shutdown.clone();
        self.serve_until(async move {
            tokio::select! {
                _ = signal::ctrl_c() => {
                    tracing::info!("Ctrl-C received; shutting down coordinator service");
                }
                _ = shutdown.cancelled() => {}
            }
        })
        .await
    }

    async fn serve_until(&mut self, stop: impl std::future::Future<Output = ()>) -> Result<()> {
        let termination = self.coordinator.termination();
        tokio::select! {
            _ = stop => {
                tracing::info!("coordinator service shutdown requested");
            }
            _ = termination.cancelled() => {
                tracing::info!(
                    grace_ms = self.termination_grace.as_millis() as u64,
                    "scan terminated; draining workers before shutdown"
                );
                tokio::select! {
                    _ = tokio::time::sleep(self.termination_grace) => {}
                    _ = self.shutdown.cancelled() => {}
                }
            }
        }

        self.stop().await?;
        match self.coordinator.fatal_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
