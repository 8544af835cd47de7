//! Orchestrator over the LMDB stores sharing one environment.

use std::sync::Arc;

use stash_storage::{
    open_env, LmdbBlobStore, LmdbCacheStore, LmdbEnv, LmdbPersistence, LmdbQuotaLedger,
    Persistence,
};
use stash_test_utils::assertions::{assert_not_found, assert_quota_exceeded};
use stash_test_utils::fixtures::{other_scope, test_scope};
use stash_test_utils::{init_test_tracing, PersistenceConfig};
use tempfile::TempDir;

fn build(env: &LmdbEnv) -> LmdbPersistence {
    Persistence::new(
        Arc::new(LmdbBlobStore::new(env).expect("blob store should open")),
        Arc::new(LmdbCacheStore::new(env).expect("cache store should open")),
        Arc::new(LmdbQuotaLedger::new(env).expect("ledger should open")),
        PersistenceConfig::default(),
    )
    .expect("default config should validate")
}

#[tokio::test]
async fn lmdb_save_load_delete() {
    init_test_tracing();
    let temp_dir = TempDir::new().expect("TempDir creation should succeed");
    let env = open_env(temp_dir.path(), 16).expect("env should open");
    let persistence = build(&env);
    let scope = test_scope();

    persistence
        .save(&scope, Some(100), "a", &[9u8; 50])
        .await
        .expect("save should succeed");
    assert_quota_exceeded(&persistence.save(&scope, Some(100), "b", &[9u8; 60]).await);
    assert_eq!(persistence.usage(&scope).await.expect("usage should succeed"), 50);

    assert_eq!(
        persistence.load(&scope, "a").await.expect("load should succeed"),
        vec![9u8; 50]
    );
    assert_not_found(&persistence.load(&scope, "b").await);

    persistence.delete(&scope, "a").await.expect("delete should succeed");
    assert_eq!(persistence.usage(&scope).await.expect("usage should succeed"), 0);
    assert_not_found(&persistence.load(&scope, "a").await);
}

#[tokio::test]
async fn lmdb_state_survives_reopen() {
    let temp_dir = TempDir::new().expect("TempDir creation should succeed");
    {
        let env = open_env(temp_dir.path(), 16).expect("env should open");
        let persistence = build(&env);
        persistence
            .save(&test_scope(), None, "k", b"persisted")
            .await
            .expect("save should succeed");
        persistence
            .save(&other_scope(), None, "k", b"other")
            .await
            .expect("save should succeed");
        drop(persistence);
        env.prepare_for_closing().wait();
    }

    let env = open_env(temp_dir.path(), 16).expect("env should reopen");
    let persistence = build(&env);
    assert_eq!(
        persistence.load(&test_scope(), "k").await.expect("load should succeed"),
        b"persisted"
    );
    assert_eq!(persistence.usage(&test_scope()).await.expect("usage should succeed"), 9);
    assert_eq!(persistence.usage(&other_scope()).await.expect("usage should succeed"), 5);

    let report = persistence
        .reconcile(&test_scope())
        .await
        .expect("reconcile should succeed");
    assert!(!report.corrected());
}
