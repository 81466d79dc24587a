use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    helpers::{init_tracing, wait_until},
    service::{fast_config, TestScan},
};
use anyhow::{anyhow, Context, Result};
use scanbroker::{completion_hook, MemoryStore, PullSignal, ScanError};
use tokio::time::timeout;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn service_surfaces_completion_hook_failure() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::with_ids(1..=2));
    let hook = completion_hook(|_summary| async { Err::<(), _>(anyhow!("report upload failed")) });
    let mut scan = TestScan::start_with_hook(store, fast_config(2).build()?, Some(hook)).await?;
    let client = scan.client()?;

    assert_eq!(client.next_unit().await?, PullSignal::Unit(1));
    assert_eq!(client.next_unit().await?, PullSignal::Unit(2));

    let err = client
        .next_unit()
        .await
        .expect_err("terminating pull should report termination");
    assert_eq!(err.downcast_ref::<ScanError>(), Some(&ScanError::Terminated));

    let outcome = timeout(Duration::from_secs(5), scan.service.run())
        .await
        .context("service should stop after the scan terminates")?;
    let err = outcome.expect_err("hook failure should surface from the service");
    let message = format!("{err:#}");
    assert!(message.contains("scan completion hook failed"), "{message}");
    assert!(message.contains("report upload failed"), "{message}");
    Ok(())
}

#[tokio::test]
async fn cancellation_token_stops_the_service() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::with_ids(1..=50));
    let mut scan = TestScan::start(store, fast_config(10).build()?).await?;
    let client = scan.client()?;
    assert!(matches!(client.next_unit().await?, PullSignal::Unit(1)));

    let token = scan.service.cancellation_token();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    timeout(Duration::from_secs(5), scan.service.run())
        .await
        .context("service should stop on cancellation")??;
    canceller.await?;

    assert!(!scan.coordinator.is_terminated(), "scan itself never finished");
    assert!(scan.service.local_addr().is_none());
    client
        .next_unit()
        .await
        .expect_err("stopped service should be unreachable");
    Ok(())
}

#[tokio::test]
async fn start_is_idempotent_and_publishes_the_endpoint() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::with_ids(1..=3));
    let mut scan = TestScan::start(store, fast_config(3).build()?).await?;

    let first = scan.service.local_addr().context("service should be bound")?;
    let second = scan.service.start().await?;
    assert_eq!(first, second);
    assert_eq!(scan.service.endpoint(), Some(scan.endpoint.clone()));

    let client = scan.client()?;
    wait_until("progress reachable", Duration::from_secs(2), || {
        let client = client.clone();
        async move { client.progress().await.is_ok() }
    })
    .await?;

    scan.service.stop().await?;
    scan.service.stop().await?;
    Ok(())
}
