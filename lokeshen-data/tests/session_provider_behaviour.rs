//! Behavioural tests for `DatabaseProvider` using rstest-bdd.

use std::cell::RefCell;
use std::sync::{Arc, Mutex};

use camino::Utf8PathBuf;
use lokeshen_core::{
    DatabaseBridge, InitOptions, SqlValue, SqliteBridge,
    test_support::{BridgeCall, CallLog, FailingBridge, RecordingBridge},
};
use lokeshen_data::{
    DatabaseContext, DatabaseProvider, DatabaseProviderBuilder, SessionError, SessionState,
};
use lokeshen_fs::AssetDatabaseSource;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tempfile::TempDir;
use tokio::runtime::{Builder, Runtime};

/// Shared state for provider scenarios.
struct ProviderWorld {
    runtime: Runtime,
    temp_dir: TempDir,
    pending: RefCell<Option<DatabaseProviderBuilder>>,
    provider: RefCell<Option<DatabaseProvider>>,
    build_error: RefCell<Option<SessionError>>,
    handled: Arc<Mutex<Vec<String>>>,
    log: RefCell<Option<CallLog>>,
    context: RefCell<Option<DatabaseContext>>,
}

impl ProviderWorld {
    fn new() -> Self {
        Self {
            runtime: Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build Tokio runtime"),
            temp_dir: TempDir::new().expect("create temp dir"),
            pending: RefCell::new(None),
            provider: RefCell::new(None),
            build_error: RefCell::new(None),
            handled: Arc::new(Mutex::new(Vec::new())),
            log: RefCell::new(None),
            context: RefCell::new(None),
        }
    }

    fn base(&self) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(self.temp_dir.path().to_path_buf())
            .expect("temp dir should be UTF-8")
    }

    fn builder(&self, name: &str) -> DatabaseProviderBuilder {
        DatabaseProvider::builder(name)
            .base_directory(self.base())
            .location("databases/")
    }

    fn install(&self, builder: DatabaseProviderBuilder) {
        match builder.build() {
            Ok(provider) => {
                self.provider.replace(Some(provider));
            }
            Err(err) => {
                self.build_error.replace(Some(err));
            }
        }
    }

    fn with_provider<T>(&self, f: impl FnOnce(&DatabaseProvider) -> T) -> T {
        let provider = self.provider.borrow();
        f(provider.as_ref().expect("provider should be built"))
    }
}

#[fixture]
fn world() -> ProviderWorld {
    ProviderWorld::new()
}

#[given("a provider configured with suspense and an error handler")]
fn given_conflicting(world: &ProviderWorld) {
    let builder = world
        .builder("wards.db")
        .use_suspense(true)
        .on_error(Arc::new(|_: &SessionError| {}));
    world.pending.replace(Some(builder));
}

#[given("a provider for the in-memory database with an asset source")]
fn given_memory_with_asset(world: &ProviderWorld) {
    let builder = DatabaseProvider::builder(":memory:").asset(AssetDatabaseSource::new("seed.db"));
    world.pending.replace(Some(builder));
}

#[given("a provider for a file database")]
fn given_file_provider(world: &ProviderWorld) {
    world.install(world.builder("wards.db"));
}

#[given("a provider whose engine fails with an error handler")]
fn given_failing_provider(world: &ProviderWorld) {
    let handled = Arc::clone(&world.handled);
    let builder = world
        .builder("wards.db")
        .bridge(Box::new(FailingBridge))
        .on_error(Arc::new(move |err: &SessionError| {
            handled
                .lock()
                .expect("handler log lock")
                .push(err.to_string());
        }));
    world.install(builder);
}

#[given("a recording provider for a file database")]
fn given_recording_provider(world: &ProviderWorld) {
    let (bridge, log) = RecordingBridge::new();
    world.log.replace(Some(log));
    world.install(world.builder("wards.db").bridge(Box::new(bridge)));
}

#[given("a bundled asset database containing one ward")]
fn given_asset(world: &ProviderWorld) {
    let path = world.base().join("bundle/seed.db");
    let mut bridge = SqliteBridge::new();
    bridge
        .init_database(&path, &InitOptions::default())
        .expect("create seed database");
    bridge
        .execute_statement("CREATE TABLE kenya_wards (id INTEGER PRIMARY KEY, ward TEXT)", &[])
        .expect("create wards table");
    bridge
        .execute_statement("INSERT INTO kenya_wards (ward) VALUES ('Kilimani')", &[])
        .expect("insert ward");
    bridge.close_database().expect("close seed database");
}

#[given("a provider for a file database seeded from that asset")]
fn given_seeded_provider(world: &ProviderWorld) {
    world.install(
        world
            .builder("wards.db")
            .asset(AssetDatabaseSource::new("bundle/seed.db")),
    );
}

#[when("the provider is mounted")]
fn when_mounted(world: &ProviderWorld) {
    world.with_provider(|provider| {
        world
            .runtime
            .block_on(provider.mount())
            .expect("mount should not return an error");
    });
}

#[when("a context is taken")]
fn when_context_taken(world: &ProviderWorld) {
    let context = world.with_provider(|provider| provider.context().expect("session is ready"));
    world.context.replace(Some(context));
}

#[when("the provider is unmounted")]
fn when_unmounted(world: &ProviderWorld) {
    world.with_provider(|provider| {
        world
            .runtime
            .block_on(provider.unmount())
            .expect("unmount should succeed");
    });
}

#[when("the provider is reconfigured to another database name")]
fn when_reconfigured(world: &ProviderWorld) {
    world.with_provider(|provider| {
        world
            .runtime
            .block_on(provider.reconfigure(|config| config.name = "notes.db".to_owned()))
            .expect("reconfigure should succeed");
    });
}

#[then("building the provider fails with conflicting strategies")]
fn then_conflicting(world: &ProviderWorld) {
    let builder = world.pending.take().expect("builder prepared");
    assert!(matches!(
        builder.build(),
        Err(SessionError::ConflictingErrorStrategies)
    ));
}

#[then("building the provider fails because memory databases have no file")]
fn then_memory_asset_rejected(world: &ProviderWorld) {
    let builder = world.pending.take().expect("builder prepared");
    assert!(matches!(
        builder.build(),
        Err(SessionError::AssetWithMemoryDatabase { .. })
    ));
}

#[then("requesting a context reports that the session is not ready")]
fn then_context_not_ready(world: &ProviderWorld) {
    assert!(world.build_error.borrow().is_none());
    world.with_provider(|provider| {
        assert!(matches!(
            provider.context(),
            Err(SessionError::ContextNotReady)
        ));
        assert!(matches!(
            world.runtime.block_on(provider.ready()),
            Err(SessionError::ContextNotReady)
        ));
    });
}

#[then("a context can run queries")]
fn then_context_works(world: &ProviderWorld) {
    let context = world.with_provider(|provider| provider.context().expect("session is ready"));
    let result = world
        .runtime
        .block_on(context.execute_query("SELECT 41 + 1 AS answer", &[]))
        .expect("query should succeed");
    assert_eq!(result.rows[0]["answer"], SqlValue::Integer(42));
}

#[then("the taken context reports that the session is not ready")]
fn then_stale_context(world: &ProviderWorld) {
    let context = world.context.take().expect("context taken earlier");
    let result = world
        .runtime
        .block_on(context.execute_query("SELECT 1", &[]));
    assert!(matches!(result, Err(SessionError::ContextNotReady)));
    world.with_provider(|provider| assert_eq!(provider.state(), SessionState::Uninitialized));
}

#[then("the error handler received the engine failure")]
fn then_handler_called(world: &ProviderWorld) {
    let handled = world.handled.lock().expect("handler log lock");
    assert_eq!(handled.len(), 1);
    assert!(handled[0].contains("engine unavailable"), "{handled:?}");
}

#[then("the provider state is failed")]
fn then_state_failed(world: &ProviderWorld) {
    world.with_provider(|provider| {
        assert!(matches!(provider.state(), SessionState::Failed { .. }));
        assert!(matches!(
            world.runtime.block_on(provider.ready()),
            Err(SessionError::InitFailed { .. })
        ));
    });
}

#[then("the bridge opened and closed each database in turn")]
fn then_sequential_reopen(world: &ProviderWorld) {
    let log = world.log.borrow().clone().expect("recording bridge installed");
    let base = world.base();
    assert_eq!(
        log.calls(),
        vec![
            BridgeCall::Init(base.join("databases/wards.db")),
            BridgeCall::Close,
            BridgeCall::Init(base.join("databases/notes.db")),
        ]
    );
    assert_eq!(log.open_handles(), 1);
}

#[then("the seeded ward is visible through a context")]
fn then_seeded(world: &ProviderWorld) {
    let context = world.with_provider(|provider| provider.context().expect("session is ready"));
    let result = world
        .runtime
        .block_on(context.execute_query("SELECT ward FROM kenya_wards", &[]))
        .expect("query seeded table");
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0]["ward"], SqlValue::from("Kilimani"));
    assert!(world.base().join("databases/wards.db").exists());
}

#[scenario(path = "tests/features/session_provider.feature", index = 0)]
fn conflicting_strategies(world: ProviderWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/session_provider.feature", index = 1)]
fn memory_with_asset(world: ProviderWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/session_provider.feature", index = 2)]
fn contexts_after_ready(world: ProviderWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/session_provider.feature", index = 3)]
fn unmount_invalidates(world: ProviderWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/session_provider.feature", index = 4)]
fn failures_to_handler(world: ProviderWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/session_provider.feature", index = 5)]
fn reconfigure_sequential(world: ProviderWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/session_provider.feature", index = 6)]
fn asset_seeding(world: ProviderWorld) {
    let _ = world;
}
