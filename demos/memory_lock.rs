//! Example: Fair locking through the provider API
//!
//! Run with: `cargo run --example memory_lock`
//!
//! Uses the in-memory coordination store. Set ZNODE_LOCK_ENDPOINTS to a
//! comma-separated endpoint list to change the session key, and RUST_LOG to
//! see negotiation traces (e.g. `RUST_LOG=znode_lock_session=trace`).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use znode_lock::*;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let endpoints = std::env::var("ZNODE_LOCK_ENDPOINTS").unwrap_or_else(|_| "mem:2181".to_string());
    let endpoints: Vec<&str> = endpoints.split(',').map(str::trim).collect();

    let service = MemoryCoordinationService::new();
    let provider = Arc::new(
        ZnodeLockProviderBuilder::new()
            .endpoints(&endpoints)
            .timeout(Duration::from_secs(5))
            .payload("memory-lock-demo")
            .build(service.connector())?,
    );
    println!("Created provider for {:?}", provider.endpoints());

    // Workers queue on one lock and are served in arrival order
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut workers = Vec::new();
    for worker in 0..3 {
        let provider = Arc::clone(&provider);
        let order = Arc::clone(&order);
        workers.push(tokio::spawn(async move {
            let lock = provider.create_lock("/demo/locks/report");
            let handle = lock.acquire(Some(Duration::from_secs(10))).await?;
            println!("worker {worker} holds {}", handle.node());
            order.lock().await.push(worker);
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle.release().await
        }));
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    for worker in workers {
        worker.await??;
    }
    println!("Service order: {:?}", order.lock().await);

    // try_acquire gives up instead of queueing
    let lock = provider.create_lock("/demo/locks/report");
    let held = lock.acquire(None).await?;
    let other = ZnodeLockProviderBuilder::new()
        .endpoint("mem:other")
        .build(service.connector())?;
    match other.create_lock("/demo/locks/report").try_acquire().await? {
        Some(_) => println!("unexpected: lock acquired twice"),
        None => println!("try_acquire: lock is busy"),
    }

    // A lost session takes its locks with it
    let mut lost = held.lost_token().clone();
    if let Some(id) = provider.session().session_id() {
        service.expire_session(id);
    }
    lost.wait_for(|lost| *lost).await?;
    println!("Session expired, lock lost");

    provider.shutdown().await?;
    other.shutdown().await?;
    println!("Providers shut down");
    Ok(())
}
