//! Full run against the real analysis capability.
//!
//! Run with: `cargo test --features real_llm --test live_capability -- --nocapture`

#![cfg(feature = "real_llm")]

mod common;

use common::{test_config, KEY};
use landeval::{CancellationToken, CapabilityClient, Evaluation, SubprocessClient};
use std::sync::Arc;

#[tokio::test]
async fn evaluates_a_listing_end_to_end() {
    let client = SubprocessClient::default();
    if !client.is_available().await {
        eprintln!("analysis capability not installed; skipping");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.stage_timeout_secs = 300;
    config.retry.base_delay_ms = 1000;
    config.retry.max_delay_ms = 16000;

    let outcome = Evaluation::new(config, Arc::new(client))
        .run(KEY, &CancellationToken::new())
        .await
        .unwrap();
    println!("report: {}", outcome.artifact.path.display());
    println!("degraded: {:?}", outcome.degraded);
    assert!(outcome.artifact.path.exists());
}
