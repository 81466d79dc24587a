use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::support::{
    helpers::{assert_no_duplicates, init_tracing},
    service::{fast_config, TestScan},
};
use anyhow::{Context, Result};
use scanbroker::{
    completion_hook, LogLevel, MemoryRecord, MemoryStore, PullSignal, RpcError, ScanDescriptor,
    ScanError, ScanPhase, WorkerPool,
};
use serde_json::json;
use tokio::time::timeout;

async fn pull_unit(client: &scanbroker::CoordinatorClient) -> Result<u64> {
    loop {
        match client.next_unit().await? {
            PullSignal::Unit(id) => return Ok(id),
            PullSignal::Locked | PullSignal::Empty => {
                tokio::time::sleep(Duration::from_millis(5)).await
            }
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn workers_over_rpc_process_every_record_once() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::with_ids(1..=120));
    let hook_calls = Arc::new(AtomicUsize::new(0));
    let hook_totals = Arc::new(Mutex::new(Vec::new()));
    let hook = {
        let hook_calls = hook_calls.clone();
        let hook_totals = hook_totals.clone();
        completion_hook(move |summary| async move {
            hook_calls.fetch_add(1, Ordering::SeqCst);
            hook_totals.lock().expect("hook lock").push(summary.total);
            Ok::<(), anyhow::Error>(())
        })
    };
    let mut scan = TestScan::start_with_hook(store, fast_config(9).build()?, Some(hook)).await?;

    let mut stubs = Vec::new();
    for index in 0..4 {
        stubs.push(scan.stub(&format!("worker-{index}")).await?);
    }

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let report = timeout(
        Duration::from_secs(20),
        WorkerPool::new(stubs).run(move |_worker, record| {
            let sink = sink.clone();
            async move {
                sink.lock().expect("sink lock").push(record.id);
                Ok::<(), anyhow::Error>(())
            }
        }),
    )
    .await
    .context("pool should finish once the scan terminates")??;

    let seen = seen.lock().expect("sink lock").clone();
    assert_eq!(seen.len(), 120);
    assert_no_duplicates(&seen);
    assert_eq!(report.processed(), 120);
    assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
    assert_eq!(*hook_totals.lock().expect("hook lock"), vec![120]);

    timeout(Duration::from_secs(5), scan.service.run())
        .await
        .context("service should stop after the termination grace")??;
    assert!(scan.coordinator.is_terminated());
    Ok(())
}

#[tokio::test]
async fn client_pulls_follow_the_refill_schedule() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::with_ids(1..=10));
    let mut scan = TestScan::start(store.clone(), fast_config(4).build()?).await?;
    let client = scan.client()?;

    let session = client.session().await?;
    assert_eq!(session.limit, 10);

    let mut ids = Vec::new();
    let mut offsets = Vec::new();
    for _ in 0..10 {
        ids.push(pull_unit(&client).await?);
        offsets.push(client.progress().await?.offset);
    }
    assert_eq!(ids, (1..=10).collect::<Vec<_>>());
    assert_eq!(offsets, vec![4, 4, 4, 4, 8, 8, 8, 8, 10, 10]);

    let page_sizes: Vec<usize> = store.queries().iter().map(|query| query.limit).collect();
    assert_eq!(page_sizes, vec![4, 4, 4]);

    let err = client
        .next_unit()
        .await
        .expect_err("exhausted scan should terminate");
    assert_eq!(err.downcast_ref::<ScanError>(), Some(&ScanError::Terminated));

    let progress = client.progress().await?;
    assert_eq!(progress.phase, ScanPhase::Terminated);

    scan.service.stop().await?;
    Ok(())
}

#[tokio::test]
async fn store_failures_reach_the_worker_without_retries() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::with_ids(1..=5));
    let config = fast_config(2)
        .descriptor(ScanDescriptor::new().order("name desc"))
        .build()?;
    let mut scan = TestScan::start(store, config).await?;
    let client = scan.client()?;

    let err = client
        .next_unit()
        .await
        .expect_err("unsupported order should fail the refill");

    match err.downcast_ref::<RpcError>() {
        Some(RpcError::Call { code, message, .. }) => {
            assert_eq!(*code, scanbroker::rpc::SCAN_FAILED_CODE);
            assert!(message.contains("find query failed at offset 0"), "{message}");
        }
        other => panic!("expected a call error, got {other:?}"),
    }
    assert_eq!(client.metrics().total_requests, 1, "call errors are not retried");

    let progress = client.progress().await?;
    assert!(!progress.refilling, "failed refill must release the lock");
    assert_eq!(progress.offset, 0);

    scan.service.stop().await?;
    Ok(())
}

#[tokio::test]
async fn rescan_over_rpc_revisits_rows() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::with_ids(1..=3));
    let config = fast_config(3).rescan_when_complete(true).build()?;
    let mut scan = TestScan::start(store, config).await?;
    let client = scan.client()?;

    let mut ids = Vec::new();
    for _ in 0..7 {
        ids.push(pull_unit(&client).await?);
    }

    assert_eq!(ids, vec![1, 2, 3, 1, 2, 3, 1]);
    let progress = client.progress().await?;
    assert_eq!(progress.passes, 2);
    assert_eq!(progress.phase, ScanPhase::Scanning);

    scan.service.stop().await?;
    Ok(())
}

#[tokio::test]
async fn vigilant_scan_picks_up_rows_added_mid_scan() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::with_ids(1..=4));
    let config = fast_config(2).vigilant(true).build()?;
    let mut scan = TestScan::start(store.clone(), config).await?;
    let client = scan.client()?;

    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(pull_unit(&client).await?);
    }
    store.insert(MemoryRecord::new(5, json!({ "late": true })))?;
    store.insert(MemoryRecord::new(6, json!({ "late": true })))?;
    for _ in 0..2 {
        ids.push(pull_unit(&client).await?);
    }
    assert_eq!(ids, (1..=6).collect::<Vec<_>>());

    let err = client
        .next_unit()
        .await
        .expect_err("stable vigilant scan should terminate");
    assert_eq!(err.downcast_ref::<ScanError>(), Some(&ScanError::Terminated));

    scan.service.stop().await?;
    Ok(())
}

#[tokio::test]
async fn stub_hydrates_with_session_options_and_forwards_logs() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::with_ids(1..=2));
    let config = fast_config(2)
        .descriptor(ScanDescriptor::new().include("owner").readonly(true))
        .build()?;
    let mut scan = TestScan::start(store, config).await?;
    let stub = scan.stub("hydrator").await?;

    assert_eq!(stub.limit(), 2);
    let record = stub.next_record().await?;
    assert_eq!(record.id, 1);
    assert!(record.readonly);

    stub.log(LogLevel::Info, "hydrated first record").await?;

    scan.service.stop().await?;
    Ok(())
}
