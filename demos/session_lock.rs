//! Example: Using sessions directly
//!
//! Run with: `cargo run --example session_lock`
//!
//! Shows the session state machine, the lock table and connection-gate
//! timeouts against the in-memory coordination store.

use std::time::Duration;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use znode_lock::*;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();

    let service = MemoryCoordinationService::new();
    let registry = SessionRegistry::new(service.connector());

    let session = registry.get_session(&["mem:1", "mem:2"], Some(Duration::from_secs(2)));
    session.on_connection().await?;
    println!("Session {} is {} (id {:?})", session.key(), session.state(), session.session_id());

    let node = session.lock("/demo/jobs/nightly", b"session-demo").await?;
    println!("Locked through {node}");
    println!("Held locks: {:?}", session.held_locks());

    match session.lock("/demo/jobs/nightly", b"").await {
        Err(e) => println!("Second lock rejected: {e}"),
        Ok(_) => println!("unexpected: lock acquired twice"),
    }

    session.unlock("/demo/jobs/nightly").await?;
    match session.unlock("/demo/jobs/nightly").await {
        Err(e) => println!("Second unlock rejected: {e}"),
        Ok(_) => println!("unexpected: lock released twice"),
    }

    // An unreachable endpoint never connects; the gate times out
    service.set_reachable("mem:down", false);
    let unreachable = registry.get_session(&["mem:down"], Some(Duration::from_millis(200)));
    match unreachable.lock("/demo/jobs/nightly", b"").await {
        Err(e) => println!("Unreachable session: {e} (state {})", unreachable.state()),
        Ok(_) => println!("unexpected: lock acquired"),
    }

    registry.shutdown_all().await?;
    println!("All sessions closed");
    Ok(())
}
