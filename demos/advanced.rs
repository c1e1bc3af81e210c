//! Fallbacks, hooks and load shedding.
//!
//! This example demonstrates:
//! 1. Observing circuit transitions through hooks
//! 2. Serving a fallback when the dependency is slow, failing or unhealthy
//! 3. Shedding load when too many calls are in flight

use command_guard::{BoxError, CommandConfig, CommandExecutor, EventKind, Fallback, HookRegistry};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

// First 3 calls succeed, the next 5 fail, then the service recovers
async fn price_lookup(calls: Arc<AtomicU32>) -> Result<(), BoxError> {
    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
    tokio::time::sleep(Duration::from_millis(20)).await;
    if (4..=8).contains(&n) {
        return Err("pricing backend unavailable".into());
    }
    Ok(())
}

fn cached_price() -> Fallback {
    Fallback::new(|cause| async move {
        println!("  serving cached price ({cause})");
        Ok::<(), BoxError>(())
    })
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter("command_guard=info")
        .init();

    println!("=== Advanced Command Example ===\n");

    let hooks = HookRegistry::new();
    hooks.set_on_open(|name| println!("  [{name}] circuit OPENED"));
    hooks.set_on_half_open(|name| println!("  [{name}] circuit HALF-OPEN, probing"));
    hooks.set_on_close(|name| println!("  [{name}] circuit CLOSED"));
    hooks.set_on_event(|name, event| {
        if event.kind == EventKind::Rejected {
            println!("  [{name}] shed a call");
        }
    });

    let executor = CommandExecutor::builder()
        .configure(
            "pricing",
            CommandConfig::new()
                .timeout(Duration::from_millis(100))
                .max_concurrent(2)
                .request_volume_threshold(5)
                .error_threshold_pct(50)
                .sleep_window(Duration::from_millis(500)),
        )
        .hooks(hooks)
        .build();

    let calls = Arc::new(AtomicU32::new(0));

    for i in 1..=15 {
        println!("--- Call {} ---", i);
        let outcome = executor
            .execute_sync("pricing", price_lookup(Arc::clone(&calls)), Some(cached_price()))
            .await;
        if let Err(err) = outcome {
            println!("  error: {err}");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    println!("\n--- Burst of 6 concurrent calls, 2 tickets ---");
    let burst: Vec<_> = (0..6)
        .map(|_| executor.execute("pricing", price_lookup(Arc::clone(&calls)), Some(cached_price())))
        .collect();
    for handle in burst {
        let _ = handle.await;
    }

    if let Ok(circuit) = executor.circuit("pricing") {
        let health = circuit.snapshot();
        println!(
            "\nFinal state={} requests={} rejected={}",
            circuit.state(),
            health.total_requests,
            health.count(EventKind::Rejected)
        );
    }

    println!("\n=== Example Completed ===");
}
