//! Lifecycle, hook and transaction tests for the session provider.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use camino::Utf8PathBuf;
use futures_util::FutureExt;
use lokeshen_core::{
    BridgeError, SqlValue,
    test_support::{CallLog, RecordingBridge},
};
use lokeshen_data::{DatabaseContext, DatabaseProvider, SessionError, SessionState, init_hook};
use rstest::fixture;
use rstest::rstest;
use tempfile::TempDir;
use tokio::time::timeout;

#[fixture]
fn temp_dir() -> TempDir {
    TempDir::new().expect("create temp dir")
}

fn base(dir: &TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 temp dir")
}

async fn notes_table(context: &DatabaseContext) {
    context
        .execute_statement(
            "CREATE TABLE IF NOT EXISTS notes (id INTEGER PRIMARY KEY, title TEXT NOT NULL)",
            &[],
        )
        .await
        .expect("create notes table");
}

async fn note_count(context: &DatabaseContext) -> i64 {
    let result = context
        .execute_query("SELECT count(*) AS n FROM notes", &[])
        .await
        .expect("count notes");
    result.rows[0]["n"].as_i64().expect("integer count")
}

async fn memory_provider() -> (DatabaseProvider, DatabaseContext) {
    let provider = DatabaseProvider::builder(":memory:")
        .build()
        .expect("build provider");
    provider.mount().await.expect("mount");
    let context = provider.context().expect("ready context");
    notes_table(&context).await;
    (provider, context)
}

#[rstest]
#[tokio::test]
async fn init_hook_runs_before_the_session_is_ready(temp_dir: TempDir) {
    let observed_initialising = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&observed_initialising);
    let hook = init_hook(move |context: DatabaseContext| {
        let flag = Arc::clone(&flag);
        async move {
            notes_table(&context).await;
            context
                .execute_statement("INSERT INTO notes (title) VALUES ('seeded by hook')", &[])
                .await?;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        }
    });
    let provider = DatabaseProvider::builder("hooked.db")
        .base_directory(base(&temp_dir))
        .on_init(hook)
        .build()
        .expect("build provider");
    let mut states = provider.subscribe();

    provider.mount().await.expect("mount");

    assert!(observed_initialising.load(Ordering::SeqCst));
    assert!(matches!(
        *states.borrow_and_update(),
        SessionState::Ready { .. }
    ));
    let context = provider.context().expect("ready context");
    assert_eq!(note_count(&context).await, 1);
}

#[rstest]
#[tokio::test]
async fn hook_failure_propagates_and_closes_the_connection(temp_dir: TempDir) {
    let (bridge, log): (RecordingBridge, CallLog) = RecordingBridge::new();
    let hook = init_hook(|context: DatabaseContext| async move {
        context.execute_statement("CREATE TABLE broken (", &[]).await?;
        Ok(())
    });
    let provider = DatabaseProvider::builder("broken.db")
        .base_directory(base(&temp_dir))
        .bridge(Box::new(bridge))
        .on_init(hook)
        .build()
        .expect("build provider");

    let err = provider.mount().await.expect_err("hook failure surfaces");

    let SessionError::InitHook { source } = &err else {
        panic!("expected an init hook error, got {err:?}");
    };
    assert!(matches!(
        source.bridge_error(),
        Some(BridgeError::StatementExecution { .. })
    ));
    assert_eq!(log.open_handles(), 0);
    assert!(matches!(provider.state(), SessionState::Failed { .. }));
    assert!(matches!(
        provider.context(),
        Err(SessionError::ContextNotReady)
    ));
}

#[rstest]
#[tokio::test]
async fn failed_mount_can_be_retried(temp_dir: TempDir) {
    let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let hook = init_hook(move |_context: DatabaseContext| {
        let counter = Arc::clone(&counter);
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(SessionError::ContextNotReady);
            }
            Ok(())
        }
    });
    let provider = DatabaseProvider::builder("retry.db")
        .base_directory(base(&temp_dir))
        .on_init(hook)
        .build()
        .expect("build provider");

    assert!(provider.mount().await.is_err());
    provider.mount().await.expect("second mount succeeds");
    assert!(matches!(provider.state(), SessionState::Ready { .. }));
}

#[tokio::test]
async fn transaction_commits_when_the_body_succeeds() {
    let (_provider, context) = memory_provider().await;

    let inserted = context
        .transaction(|tx| {
            async move {
                tx.execute_statement("INSERT INTO notes (title) VALUES ('Uhuru Park')", &[])
                    .await?;
                tx.execute_statement("INSERT INTO notes (title) VALUES ('Jeevanjee')", &[])
                    .await?;
                Ok(2)
            }
            .boxed()
        })
        .await
        .expect("transaction commits");

    assert_eq!(inserted, 2);
    assert_eq!(note_count(&context).await, 2);
}

#[tokio::test]
async fn transaction_rolls_back_when_the_body_fails() {
    let (_provider, context) = memory_provider().await;

    let result: Result<(), SessionError> = context
        .transaction(|tx| {
            async move {
                tx.execute_statement("INSERT INTO notes (title) VALUES ('kept?')", &[])
                    .await?;
                tx.execute_statement("INSERT INTO notes (title) VALUES (NULL)", &[])
                    .await?;
                Ok(())
            }
            .boxed()
        })
        .await;

    assert!(result.is_err());
    assert_eq!(note_count(&context).await, 0);
}

#[tokio::test]
async fn dropped_transaction_rolls_back() {
    let (_provider, context) = memory_provider().await;

    let mut tx = context.begin().await.expect("begin");
    tx.execute_statement("INSERT INTO notes (title) VALUES ('abandoned')", &[])
        .await
        .expect("insert");
    let seen = tx
        .execute_query("SELECT count(*) AS n FROM notes", &[])
        .await
        .expect("count inside transaction");
    assert_eq!(seen.rows[0]["n"], SqlValue::Integer(1));
    drop(tx);

    assert_eq!(note_count(&context).await, 0);
}

#[tokio::test]
async fn explicit_rollback_discards_writes() {
    let (_provider, context) = memory_provider().await;

    let mut tx = context.begin().await.expect("begin");
    tx.execute_statement("INSERT INTO notes (title) VALUES ('undone')", &[])
        .await
        .expect("insert");
    tx.rollback().await.expect("rollback");

    assert_eq!(note_count(&context).await, 0);
}

#[tokio::test]
async fn suspense_ready_waits_for_a_later_mount() {
    let provider = Arc::new(
        DatabaseProvider::builder(":memory:")
            .use_suspense(true)
            .build()
            .expect("build provider"),
    );
    let waiter = {
        let provider = Arc::clone(&provider);
        tokio::spawn(async move { provider.ready().await })
    };
    tokio::task::yield_now().await;
    assert!(!waiter.is_finished());

    provider.mount().await.expect("mount");

    let context = timeout(Duration::from_secs(5), waiter)
        .await
        .expect("ready resolves after mount")
        .expect("waiter task joins")
        .expect("context issued");
    assert!(context.is_current());
}

#[tokio::test]
async fn ready_without_suspense_fails_fast() {
    let provider = DatabaseProvider::builder(":memory:")
        .build()
        .expect("build provider");

    let result = timeout(Duration::from_secs(5), provider.ready())
        .await
        .expect("ready does not wait");

    assert!(matches!(result, Err(SessionError::ContextNotReady)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_statements_are_serialised() {
    let (_provider, context) = memory_provider().await;

    let writers = (0..16).map(|index| {
        let context = context.clone();
        tokio::spawn(async move {
            context
                .execute_statement(
                    "INSERT INTO notes (title) VALUES (?)",
                    &[SqlValue::Text(format!("note {index}"))],
                )
                .await
        })
    });
    for writer in writers.collect::<Vec<_>>() {
        let result = writer.await.expect("writer joins").expect("insert succeeds");
        assert_eq!(result.rows_affected, 1);
    }

    assert_eq!(note_count(&context).await, 16);
}

#[rstest]
#[tokio::test]
async fn reconfigure_without_identity_change_keeps_the_session(temp_dir: TempDir) {
    let (bridge, log) = RecordingBridge::new();
    let provider = DatabaseProvider::builder("stable.db")
        .base_directory(base(&temp_dir))
        .bridge(Box::new(bridge))
        .build()
        .expect("build provider");
    provider.mount().await.expect("mount");
    let context = provider.context().expect("ready context");

    provider
        .reconfigure(|config| config.name = "stable.db".to_owned())
        .await
        .expect("reconfigure");

    assert_eq!(log.calls().len(), 1);
    assert!(context.is_current());
}

#[rstest]
#[tokio::test]
async fn dropping_the_provider_invalidates_contexts(temp_dir: TempDir) {
    let provider = DatabaseProvider::builder("dropped.db")
        .base_directory(base(&temp_dir))
        .build()
        .expect("build provider");
    provider.mount().await.expect("mount");
    let context = provider.context().expect("ready context");

    drop(provider);

    assert!(!context.is_current());
    assert!(matches!(
        context.execute_query("SELECT 1", &[]).await,
        Err(SessionError::ContextNotReady)
    ));
}

#[rstest]
#[tokio::test]
async fn dropping_the_provider_closes_the_connection_off_the_runtime(temp_dir: TempDir) {
    let (bridge, log) = RecordingBridge::new();
    let provider = DatabaseProvider::builder("closed.db")
        .base_directory(base(&temp_dir))
        .bridge(Box::new(bridge))
        .build()
        .expect("build provider");
    provider.mount().await.expect("mount");
    assert_eq!(log.open_handles(), 1);

    drop(provider);

    timeout(Duration::from_secs(5), async {
        while log.open_handles() > 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("connection closed after drop");
}

#[rstest]
fn dropping_the_provider_outside_a_runtime_closes_inline(temp_dir: TempDir) {
    let (bridge, log) = RecordingBridge::new();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("build runtime");
    let provider = DatabaseProvider::builder("inline.db")
        .base_directory(base(&temp_dir))
        .bridge(Box::new(bridge))
        .build()
        .expect("build provider");
    runtime.block_on(provider.mount()).expect("mount");

    drop(provider);

    assert_eq!(log.open_handles(), 0);
}
