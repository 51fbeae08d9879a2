//! Walks the resilient facade through an outage and a recovery.
//!
//! Optional first argument: path to a YAML resilience profile. Without it a short
//! built-in profile is used so the sequence finishes in a few seconds.

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use story_resilience::facade::fallback;
use story_resilience::resilience::{CircuitBreakerConfig, RetryConfig};
use story_resilience::service::{ElementService, ElementType, InMemoryElementService};
use story_resilience::{ResilienceConfig, ResilientServiceBuilder};

fn demo_profile() -> ResilienceConfig {
    ResilienceConfig::new(CircuitBreakerConfig::new(3, Duration::from_secs(2))).with_retry(
        RetryConfig::new()
            .with_max_retries(2)
            .with_initial_delay(Duration::from_millis(50))
            .with_max_delay(Duration::from_millis(200)),
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    story_resilience::logging::init_tracing("story_resilience=info");

    let config = match std::env::args().nth(1) {
        Some(path) => ResilienceConfig::from_yaml_file(&path)
            .with_context(|| format!("loading resilience profile {}", path))?,
        None => demo_profile(),
    }
    .with_env_overrides();

    let backend = Arc::new(InMemoryElementService::new());
    let svc = ResilientServiceBuilder::new()
        .config(config)
        .build(backend.clone())
        .context("building resilient service")?;

    println!("=== Backend online ===");
    let bard = svc
        .create_element(ElementType::Character, "Aria", "A wandering bard")
        .await?;
    println!("created #{} {}", bard.id, bard.title);
    let cached = svc.get_element_by_id(bard.id).await?;
    println!(
        "read back #{} (backend calls so far: {})",
        cached.map(|e| e.id).unwrap_or_default(),
        backend.call_count()
    );

    println!("\n=== Backend offline ===");
    backend.set_offline(true);
    let harbor = svc
        .create_element(ElementType::Location, "Harbor", "Fog and gulls")
        .await?;
    println!(
        "created #{} {} (offline placeholder: {})",
        harbor.id,
        harbor.title,
        fallback::is_offline(&harbor)
    );
    let hits = svc.search_elements("harbor").await?;
    println!("search while offline returned {} elements", hits.len());
    for op in ["load_large_dataset", "link_elements", "create_element"] {
        println!("circuit {:<20} {}", op, svc.circuit_breaker().get_state(op));
    }
    let snapshot = svc.snapshot();
    println!("pending reconciliation: {:?}", snapshot.queued_tasks);

    println!("\n=== Backend back online ===");
    backend.set_offline(false);
    svc.queue().wait_idle().await;
    tokio::time::sleep(svc.circuit_breaker().config().recovery_timeout).await;

    let found = svc.search_elements("harbor").await?;
    println!("search after recovery returned {} elements", found.len());
    let stats = svc.snapshot();
    println!(
        "queue: {} completed, {} failed; cache hit ratio {:.2}; healthy: {}",
        stats.queue.completed,
        stats.queue.failed,
        stats.cache.hit_ratio(),
        stats.is_healthy()
    );

    svc.shutdown().await;
    Ok(())
}
