//! End-to-end pipeline behavior: ordering barriers, degradation, fatal
//! failures, retries, crashes and cancellation.

mod common;

use common::{
    lock_path, test_config, Behavior, CountingIndex, ScriptedClient, INTEGRATED_TARGET, KEY, LEAF_TARGETS,
    NARRATIVE_TARGET,
};
use landeval::analysis::graph::{INTEGRATED_EVALUATION, NARRATIVE_REPORT, OCCUPANCY_ANALYSIS, PROPERTY_ANALYSIS};
use landeval::workspace::{HashingEmbedder, IndexBackend};
use landeval::{CancellationToken, Evaluation, ReportFormat, StageDefinition, StageId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;

fn evaluation(config: landeval::RunConfig, client: Arc<ScriptedClient>) -> Evaluation {
    Evaluation::new(config, client)
}

#[tokio::test]
async fn fan_in_waits_for_every_leaf_under_random_latency_and_failures() {
    for seed in 0..6u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.index.backend = IndexBackend::Memory;

        let mut client = ScriptedClient::new();
        let mut failing = 0;
        for target in LEAF_TARGETS {
            let behavior = Behavior {
                latency: Duration::from_millis(rng.gen_range(0..25)),
                transient_failures: rng.gen_range(0..=2),
                permanent_failure: rng.gen_bool(0.2),
                panics: false,
            };
            if behavior.permanent_failure {
                failing += 1;
            }
            client = client.with(target, behavior);
        }
        client = client
            .with(INTEGRATED_TARGET, Behavior::latency_ms(rng.gen_range(0..10)))
            .with(NARRATIVE_TARGET, Behavior::latency_ms(rng.gen_range(0..10)));
        let client = Arc::new(client);

        let outcome = evaluation(config, client.clone())
            .run(KEY, &CancellationToken::new())
            .await
            .unwrap_or_else(|e| panic!("seed {}: {}", seed, e));

        let leaves_done = client.last_end(&LEAF_TARGETS).unwrap();
        let integrated_start = client.first_start(INTEGRATED_TARGET).unwrap();
        assert!(integrated_start >= leaves_done, "seed {}: fan-in started early", seed);

        let integrated_done = client.last_end(&[INTEGRATED_TARGET]).unwrap();
        let narrative_start = client.first_start(NARRATIVE_TARGET).unwrap();
        assert!(narrative_start >= integrated_done, "seed {}: terminal started early", seed);

        assert_eq!(outcome.degraded.len(), failing, "seed {}", seed);
        assert_eq!(outcome.findings.len(), 7);
        assert!(client.peak_in_flight() <= 3, "seed {}: concurrency cap exceeded", seed);
    }
}

#[tokio::test]
async fn concurrency_is_bounded_by_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.max_concurrency = 2;

    let mut client = ScriptedClient::new();
    for target in LEAF_TARGETS {
        client = client.with(target, Behavior::latency_ms(20));
    }
    let client = Arc::new(client);

    evaluation(config, client.clone())
        .run(KEY, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(client.peak_in_flight(), 2);
    assert_eq!(client.total_calls(), 7);
}

#[tokio::test]
async fn failed_leaf_is_reported_as_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.report.primary = ReportFormat::Markdown;
    let client = Arc::new(ScriptedClient::new().with("property_analyst", Behavior::permanent()));

    let outcome = evaluation(config, client.clone())
        .run(KEY, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.degraded, vec![StageId::from(PROPERTY_ANALYSIS)]);
    // non-transient failures are not retried
    assert_eq!(client.calls("property_analyst"), 1);
    assert_eq!(client.calls(INTEGRATED_TARGET), 1);

    let finding = &outcome.findings[&StageId::from(PROPERTY_ANALYSIS)];
    assert!(!finding.is_available());

    let report = std::fs::read_to_string(&outcome.artifact.path).unwrap();
    let leaf_titles = [
        "Property Analysis",
        "Environmental Evaluation",
        "Growth Trends",
        "Housing Units and Occupancy",
        "Demographics and Affordability",
    ];
    let positions: Vec<usize> = leaf_titles
        .iter()
        .map(|title| {
            report
                .find(&format!("\n## {}\n", title))
                .unwrap_or_else(|| panic!("missing section {}", title))
        })
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]), "leaf sections out of order");

    assert_eq!(report.matches("Unavailable:").count(), 1);
    let marker = report.find("Unavailable:").unwrap();
    assert!(positions[0] < marker && marker < positions[1]);
    assert!(report.contains("## Integrated Evaluation"));
}

#[tokio::test]
async fn terminal_failure_is_fatal_and_writes_no_report() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let reports = config.reports_dir.clone();
    let workspace = config.workspace_dir.clone();
    let client = Arc::new(ScriptedClient::new().with(NARRATIVE_TARGET, Behavior::permanent()));

    let err = evaluation(config, client.clone())
        .run(KEY, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "PermanentStageError");
    assert_eq!(err.exit_code(), 6);
    assert!(err.to_string().contains(NARRATIVE_REPORT));
    assert_eq!(client.calls(INTEGRATED_TARGET), 1);
    assert_eq!(client.calls(NARRATIVE_TARGET), 1);
    let written = std::fs::read_dir(&reports).map(|d| d.count()).unwrap_or(0);
    assert_eq!(written, 0);
    assert!(!workspace.exists());
    assert!(!lock_path(&workspace).exists());
}

#[tokio::test]
async fn custom_fan_in_without_explicit_policy_is_still_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let workspace = config.workspace_dir.clone();
    let stages = vec![
        StageDefinition::new("parcel", "Parcel")
            .with_target("property_analyst")
            .depends_on_extract("Property"),
        StageDefinition::new("flood", "Flood")
            .with_target("environmental_evaluator")
            .depends_on_extract("Environmental"),
        StageDefinition::new("summary", "Summary")
            .with_target(INTEGRATED_TARGET)
            .depends_on_stage("parcel")
            .depends_on_stage("flood"),
    ];
    let client = Arc::new(ScriptedClient::new().with(INTEGRATED_TARGET, Behavior::permanent()));

    let err = evaluation(config, client.clone())
        .with_stages(stages)
        .run(KEY, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "PermanentStageError");
    assert!(err.to_string().contains("summary"));
    assert!(!workspace.exists());
}

#[tokio::test]
async fn fan_in_failure_is_fatal_and_writes_no_report() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let reports = config.reports_dir.clone();
    let workspace = config.workspace_dir.clone();
    let client = Arc::new(ScriptedClient::new().with(INTEGRATED_TARGET, Behavior::permanent()));

    let err = evaluation(config, client.clone())
        .run(KEY, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "PermanentStageError");
    assert_eq!(err.exit_code(), 6);
    assert!(err.to_string().contains(INTEGRATED_EVALUATION));
    assert_eq!(client.calls(NARRATIVE_TARGET), 0);
    let written = std::fs::read_dir(&reports).map(|d| d.count()).unwrap_or(0);
    assert_eq!(written, 0);
    assert!(!workspace.exists());
}

#[tokio::test]
async fn transient_failures_are_retried_with_backoff() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let client = Arc::new(ScriptedClient::new().with("growth_trends_expert", Behavior::transient(2)));

    let outcome = evaluation(config, client.clone())
        .run(KEY, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(client.calls("growth_trends_expert"), 3);
    assert!(outcome.degraded.is_empty());
    let finding = outcome
        .findings
        .values()
        .find(|f| f.stage().as_str() == "growth_trends_analysis")
        .unwrap();
    assert_eq!(finding.attempts(), 3);
    assert_eq!(finding.text(), "growth_trends_expert finding");
}

#[tokio::test]
async fn exhausted_retries_degrade_a_leaf() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let client = Arc::new(ScriptedClient::new().with("occupancy_expert", Behavior::transient(100)));

    let outcome = evaluation(config, client.clone())
        .run(KEY, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(client.calls("occupancy_expert"), 4);
    assert_eq!(outcome.degraded, vec![StageId::from(OCCUPANCY_ANALYSIS)]);
}

#[tokio::test]
async fn crashed_stage_is_fatal_and_tears_down_once() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let workspace = config.workspace_dir.clone();
    let index = Arc::new(CountingIndex::new(config.index.dimensions));
    let embedder = Arc::new(HashingEmbedder::new(config.index.dimensions));
    let client = Arc::new(ScriptedClient::new().with("environmental_evaluator", Behavior::panicking()));

    let err = evaluation(config, client.clone())
        .with_index(index.clone(), embedder)
        .run(KEY, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "StageCrashed");
    assert_ne!(err.exit_code(), 0);
    assert_eq!(client.calls(INTEGRATED_TARGET), 0);
    // one reset when opened, one when torn down
    assert_eq!(index.resets(), 2);
    assert!(!workspace.exists());
    assert!(!lock_path(&workspace).exists());
}

#[tokio::test]
async fn completed_stages_are_written_to_the_index() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let index = Arc::new(CountingIndex::new(config.index.dimensions));
    let embedder = Arc::new(HashingEmbedder::new(config.index.dimensions));

    let outcome = evaluation(config, Arc::new(ScriptedClient::new()))
        .with_index(index.clone(), embedder)
        .run(KEY, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(index.inserts(), 7);
    assert_eq!(outcome.teardown.unwrap().index_entries_cleared, 7);
    assert_eq!(index.resets(), 2);
}

#[tokio::test]
async fn cancellation_stops_the_run_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let workspace = config.workspace_dir.clone();
    let reports = config.reports_dir.clone();

    let mut client = ScriptedClient::new();
    for target in LEAF_TARGETS {
        client = client.with(target, Behavior::latency_ms(200));
    }
    let client = Arc::new(client);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let err = evaluation(config, client.clone()).run(KEY, &cancel).await.unwrap_err();

    assert_eq!(err.kind(), "Cancelled");
    assert_eq!(err.exit_code(), 130);
    assert_eq!(client.calls(INTEGRATED_TARGET), 0);
    assert!(!workspace.exists());
    assert!(!reports.exists());
}

#[tokio::test]
async fn runs_on_one_workspace_are_serialized() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let held = landeval::Workspace::open(&config.workspace_dir, IndexBackend::Memory, 8).unwrap();

    let err = evaluation(config.clone(), Arc::new(ScriptedClient::new()))
        .run(KEY, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "WorkspaceError");
    assert_eq!(err.exit_code(), 5);

    drop(held);
    tokio_test::assert_ok!(
        evaluation(config, Arc::new(ScriptedClient::new()))
            .run(KEY, &CancellationToken::new())
            .await
    );
}
