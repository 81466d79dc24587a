use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use scanbroker::{
    CompletionHook, Coordinator, CoordinatorClient, CoordinatorService, MemoryStore,
    RpcClientOptions, ScanConfigBuilder, ScanConfig, WaitPolicy, WorkerStub,
};

pub const TEST_GRACE: Duration = Duration::from_millis(500);

/// Config builder with short waits so tests never sit in a 30s backoff.
pub fn fast_config(queue_size: usize) -> ScanConfigBuilder {
    ScanConfig::builder()
        .queue_size(queue_size)
        .locked_queue_wait(Duration::from_millis(5))
        .empty_queue_wait(Duration::from_millis(20))
        .metrics_interval(Duration::from_millis(50))
}

pub fn fast_client_options() -> RpcClientOptions {
    RpcClientOptions {
        request_timeout: Duration::from_secs(2),
        max_attempts: 2,
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(10),
        ..RpcClientOptions::default()
    }
}

pub struct TestScan {
    pub store: Arc<MemoryStore>,
    pub coordinator: Arc<Coordinator<MemoryStore>>,
    pub service: CoordinatorService<MemoryStore>,
    pub endpoint: String,
}

impl TestScan {
    pub async fn start(store: Arc<MemoryStore>, config: ScanConfig) -> Result<Self> {
        Self::start_with_hook(store, config, None).await
    }

    pub async fn start_with_hook(
        store: Arc<MemoryStore>,
        config: ScanConfig,
        hook: Option<CompletionHook>,
    ) -> Result<Self> {
        let mut coordinator = Coordinator::open(store.clone(), config).await?;
        if let Some(hook) = hook {
            coordinator = coordinator.with_completion_hook(hook);
        }
        let coordinator = Arc::new(coordinator);

        let listen: SocketAddr = ([127, 0, 0, 1], 0).into();
        let mut service = CoordinatorService::new(coordinator.clone(), listen)
            .with_termination_grace(TEST_GRACE);
        let local_addr = service.start().await?;

        Ok(Self {
            store,
            coordinator,
            service,
            endpoint: format!("http://{local_addr}"),
        })
    }

    pub fn client(&self) -> Result<CoordinatorClient> {
        CoordinatorClient::with_options(self.endpoint.clone(), fast_client_options())
    }

    /// A stub talking to this scan over its own HTTP client.
    pub async fn stub(&self, name: &str) -> Result<WorkerStub<MemoryStore>> {
        let client = Arc::new(self.client()?);
        Ok(WorkerStub::connect(client, self.store.clone())
            .await?
            .with_name(name)
            .with_wait_policy(WaitPolicy {
                locked: Duration::from_millis(5),
                empty: Duration::from_millis(20),
            }))
    }
}
