//! Listing selection and segmentation failures stop a run before any
//! workspace state exists.

mod common;

use common::{test_config, write_master, ScriptedClient, KEY, OTHER_KEY};
use landeval::store::StoreError;
use landeval::{resolve_selection, CancellationToken, Evaluation, RunError, TabularStore};
use std::sync::Arc;
use tokio_test::assert_err;

fn evaluation(config: landeval::RunConfig) -> Evaluation {
    Evaluation::new(config, Arc::new(ScriptedClient::new()))
}

#[tokio::test]
async fn unknown_key_fails_before_the_workspace_opens() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let workspace = config.workspace_dir.clone();

    let err = evaluation(config)
        .run("ZZZ999", &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "KeyNotFound");
    assert_eq!(err.exit_code(), 3);
    assert!(err.is_pre_pipeline());
    assert!(!workspace.exists());
}

#[tokio::test]
async fn duplicated_key_is_never_guessed() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.store_path = write_master(&dir.path().join("dupes.csv"), &[KEY, OTHER_KEY, KEY]);
    let workspace = config.workspace_dir.clone();

    let err = evaluation(config).run(KEY, &CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, RunError::Store(StoreError::DuplicateKey { .. })));
    assert_eq!(err.kind(), "DuplicateKey");
    assert!(!workspace.exists());
}

#[tokio::test]
async fn missing_schema_column_fails_validation() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    let path = dir.path().join("no_zip.csv");
    let master = std::fs::read_to_string(&config.store_path).unwrap();
    std::fs::write(&path, master.replacen(",Zip,", ",Postal,", 1)).unwrap();
    config.store_path = path;
    let workspace = config.workspace_dir.clone();

    let err = evaluation(config).run(KEY, &CancellationToken::new()).await.unwrap_err();

    assert_eq!(err.kind(), "SchemaValidationError");
    assert_eq!(err.exit_code(), 4);
    assert!(err.to_string().contains("Zip"));
    assert!(!workspace.exists());
}

#[tokio::test]
async fn missing_store_is_a_store_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.store_path = dir.path().join("absent.csv");

    let result = evaluation(config).run(KEY, &CancellationToken::new()).await;
    let err = assert_err!(result);
    assert_eq!(err.kind(), "StoreError");
}

#[test]
fn listing_keys_does_not_touch_the_workspace() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let store = TabularStore::load(&config.store_path, &config.key_column, config.delimiter_byte()).unwrap();

    assert_eq!(store.keys(), vec![KEY, OTHER_KEY]);
    assert_eq!(store.keys(), vec![KEY, OTHER_KEY]);
    assert!(!config.workspace_dir.exists());
}

#[test]
fn interactive_choice_accepts_position_or_key() {
    let keys = [KEY, OTHER_KEY];
    assert_eq!(resolve_selection("2", &keys), Some(OTHER_KEY));
    assert_eq!(resolve_selection(" ABC123 ", &keys), Some(KEY));
    assert_eq!(resolve_selection("3", &keys), None);
    assert_eq!(resolve_selection("abc123", &keys), None);
}
