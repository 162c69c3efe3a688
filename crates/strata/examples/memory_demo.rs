//! # Hierarchical Memory Demo
//!
//! Walks through the host operations against an in-memory store:
//!
//! 1. Remember a handful of utterances (themes form on their own)
//! 2. Recall top-down from a free-text query
//! 3. Detect and consolidate a preference conflict
//! 4. Reason across the knowledge graph
//! 5. Reflect and evolve rules into a temp file
//!
//! ## Run This Example
//!
//! ```bash
//! RUST_LOG=strata=debug cargo run --example memory_demo
//! ```

use std::sync::Arc;
use strata::memory::{ConflictConfig, HashEmbeddingProvider, ReflectionConfig};
use strata::prelude::*;
use strata::GraphOutput;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("=== Hierarchical Memory Demo ===\n");

    let rules_dir = tempfile::tempdir()?;
    let config = MemoryConfig::new("demo")
        .with_conflict(ConflictConfig::default().with_similarity_threshold(0.7))
        .with_reflection(ReflectionConfig {
            rule_min_theme_size: 2,
            ..ReflectionConfig::default()
        });

    let engine = Arc::new(
        MemoryEngine::builder()
            .with_config(config)
            .with_rules_file(rules_dir.path().join("rules.md"))
            .build()
            .await?,
    );

    // ========================================
    // 1. REMEMBER
    // ========================================
    info!("=== 1. Remember ===");
    let utterances = [
        ("Alice works at Acme", vec!["Alice", "Acme"]),
        ("Acme builds rockets in Denver", vec!["Acme", "Denver"]),
        ("Alice prefers Rust for tooling", vec!["Alice", "Rust"]),
        ("Alice plans to visit Denver next month", vec!["Alice", "Denver"]),
    ];
    for (content, entities) in utterances {
        let result = engine
            .remember(RememberParams::new(content).with_entities(entities))
            .await?;
        info!("{}", result.to_text());
    }

    // ========================================
    // 2. RECALL
    // ========================================
    info!("\n=== 2. Recall ===");
    let recall = engine
        .recall(RecallParams::new("what does alice like").with_episodes())
        .await?;
    info!("{}", recall.answer);

    // ========================================
    // 3. CONFLICTS
    // ========================================
    info!("\n=== 3. Conflicts ===");
    let contradicting = engine
        .remember(
            RememberParams::new("Alice dislikes Rust for tooling")
                .with_entities(["Alice", "Rust"])
                .with_confidence(0.95),
        )
        .await?;
    info!("{}", contradicting.to_text());
    let consolidated = engine.consolidate().await?;
    info!("{}", consolidated.to_text());

    // ========================================
    // 4. REASONING
    // ========================================
    info!("\n=== 4. Reasoning ===");
    let reasoning = engine.reason(ReasonParams::new("Where is Alice's company?")).await?;
    info!("{}", reasoning.to_text());

    if let GraphOutput::Path { path: Some(path) } = engine.graph(GraphQuery::Path {
        source: "Alice".into(),
        target: "Denver".into(),
        max_hops: 3,
    }) {
        info!("Path: {}", path.describe());
    }

    // ========================================
    // 5. REFLECT AND EVOLVE
    // ========================================
    info!("\n=== 5. Reflect and Evolve ===");
    info!("{}", engine.reflect().await?.to_text());
    let evolved = engine.evolve(EvolveParams::FromReflection).await?;
    info!("{}", evolved.to_text());

    // Background jobs stop when their handles drop
    let sweep = engine.start_forgetting_sweep(&TokioScheduler::new(), std::time::Duration::from_secs(3600));
    sweep.shutdown().await;

    let status = engine.invoke("status", serde_json::Value::Null).await?;
    info!("\n{}", status.text);

    // Embeddings are optional; the hash provider shows the wiring
    let embedded = MemoryEngine::builder()
        .with_embedding_provider(Arc::new(HashEmbeddingProvider::default()))
        .build()
        .await?;
    embedded.remember(RememberParams::new("Embeddings are cached per record")).await?;
    info!("Embedded index holds {} vectors", embedded.index().cached_len());

    Ok(())
}
