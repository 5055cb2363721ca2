//! Session lifecycle for the single shared database connection.
//!
//! A [`DatabaseProvider`] owns one [`DatabaseBridge`] and moves it through
//! an explicit state machine published on a [`tokio::sync::watch`] channel:
//!
//! ```text
//! Uninitialized -> Initializing -> Ready -> TearingDown -> Uninitialized
//!                        \
//!                         -> Failed
//! ```
//!
//! Application code receives [`DatabaseContext`] handles once the session is
//! ready, either immediately through [`DatabaseProvider::context`] or by
//! awaiting [`DatabaseProvider::ready`].

mod context;
mod error;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use camino::Utf8PathBuf;
use log::{debug, info, warn};
use lokeshen_core::{DatabaseBridge, InitOptions, SpatialBackend, SqliteBridge};
use lokeshen_fs::{
    AssetDatabaseSource, AssetResolver, BundleResolver, create_database_path,
    import_database_from_asset, is_memory_database,
};
use tokio::runtime::Handle;
use tokio::sync::{Mutex, watch};
use tokio::task;

pub use context::{DatabaseContext, Transaction};
pub use error::SessionError;

use context::{SharedBridge, run_blocking};

/// Lifecycle state of a [`DatabaseProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No connection is open.
    Uninitialized,
    /// The connection is being opened and the init hook is running.
    Initializing {
        /// Generation being initialised.
        generation: u64,
    },
    /// The connection is open and contexts may be issued.
    Ready {
        /// Generation of the live session.
        generation: u64,
    },
    /// Initialisation failed; mount again to retry.
    Failed {
        /// Rendered cause of the failure.
        reason: String,
    },
    /// The connection is being closed.
    TearingDown,
}

/// Caller-supplied async work run after the connection opens and before the
/// session becomes ready, such as pragma tuning or schema bootstrap.
#[async_trait]
pub trait InitHook: Send + Sync {
    /// Prepare the freshly opened database.
    async fn on_init(&self, context: &DatabaseContext) -> Result<(), SessionError>;
}

struct FnHook<F>(F);

#[async_trait]
impl<F, Fut> InitHook for FnHook<F>
where
    F: Fn(DatabaseContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), SessionError>> + Send,
{
    async fn on_init(&self, context: &DatabaseContext) -> Result<(), SessionError> {
        (self.0)(context.clone()).await
    }
}

/// Wrap an async closure as an [`InitHook`].
pub fn init_hook<F, Fut>(hook: F) -> Arc<dyn InitHook>
where
    F: Fn(DatabaseContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), SessionError>> + Send + 'static,
{
    Arc::new(FnHook(hook))
}

/// Receives initialisation failures instead of the caller of
/// [`DatabaseProvider::mount`].
pub type ErrorHandler = Arc<dyn Fn(&SessionError) + Send + Sync>;

/// Everything that decides which database a provider opens and how.
#[derive(Clone)]
pub struct ProviderConfig {
    /// Logical database name, or `:memory:`.
    pub name: String,
    /// Optional subdirectory below the base directory.
    pub location: Option<String>,
    /// Writable directory databases live under.
    pub base_directory: Utf8PathBuf,
    /// Bundled seed database copied on first mount.
    pub asset: Option<AssetDatabaseSource>,
    /// Hook run before the session becomes ready.
    pub on_init: Option<Arc<dyn InitHook>>,
    /// Open the connection read-only.
    pub read_only: bool,
    /// Spatial capabilities attached on open.
    pub spatial: SpatialBackend,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("location", &self.location)
            .field("base_directory", &self.base_directory)
            .field("asset", &self.asset)
            .field("on_init", &self.on_init.is_some())
            .field("read_only", &self.read_only)
            .field("spatial", &self.spatial)
            .finish()
    }
}

impl ProviderConfig {
    /// Resolved database path for this configuration.
    #[must_use]
    pub fn database_path(&self) -> Utf8PathBuf {
        create_database_path(&self.name, self.location.as_deref(), &self.base_directory)
    }

    /// Whether switching from `self` to `other` requires a fresh connection.
    #[must_use]
    pub fn requires_reopen(&self, other: &Self) -> bool {
        let same_hook = match (&self.on_init, &other.on_init) {
            (None, None) => true,
            (Some(current), Some(next)) => Arc::ptr_eq(current, next),
            _ => false,
        };
        self.name != other.name
            || self.location != other.location
            || self.base_directory != other.base_directory
            || self.asset != other.asset
            || self.read_only != other.read_only
            || self.spatial != other.spatial
            || !same_hook
    }

    fn validate(&self) -> Result<(), SessionError> {
        match &self.asset {
            Some(asset) if is_memory_database(&self.name) => {
                Err(SessionError::AssetWithMemoryDatabase {
                    asset_id: asset.asset_id.clone(),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Builder for [`DatabaseProvider`].
pub struct DatabaseProviderBuilder {
    config: ProviderConfig,
    use_suspense: bool,
    on_error: Option<ErrorHandler>,
    bridge: Option<Box<dyn DatabaseBridge>>,
    resolver: Option<Arc<dyn AssetResolver>>,
}

impl DatabaseProviderBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            config: ProviderConfig {
                name: name.into(),
                location: None,
                base_directory: Utf8PathBuf::from("."),
                asset: None,
                on_init: None,
                read_only: false,
                spatial: SpatialBackend::default(),
            },
            use_suspense: false,
            on_error: None,
            bridge: None,
            resolver: None,
        }
    }

    /// Store the database in `location` below the base directory.
    #[must_use]
    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.config.location = Some(location.into());
        self
    }

    /// Writable directory databases are created under.
    #[must_use]
    pub fn base_directory(mut self, base: impl Into<Utf8PathBuf>) -> Self {
        self.config.base_directory = base.into();
        self
    }

    /// Seed the database from a bundled asset on first mount.
    #[must_use]
    pub fn asset(mut self, asset: AssetDatabaseSource) -> Self {
        self.config.asset = Some(asset);
        self
    }

    /// Run `hook` after opening and before the session becomes ready.
    #[must_use]
    pub fn on_init(mut self, hook: Arc<dyn InitHook>) -> Self {
        self.config.on_init = Some(hook);
        self
    }

    /// Let [`DatabaseProvider::ready`] wait for a mount that has not started
    /// yet, with failures surfacing to the waiting caller.
    #[must_use]
    pub fn use_suspense(mut self, enabled: bool) -> Self {
        self.use_suspense = enabled;
        self
    }

    /// Route initialisation failures to `handler` instead of returning them.
    #[must_use]
    pub fn on_error(mut self, handler: ErrorHandler) -> Self {
        self.on_error = Some(handler);
        self
    }

    /// Open the connection read-only.
    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.config.read_only = read_only;
        self
    }

    /// Spatial capabilities attached when the connection opens.
    #[must_use]
    pub fn spatial(mut self, spatial: SpatialBackend) -> Self {
        self.config.spatial = spatial;
        self
    }

    /// Use `bridge` instead of a fresh [`SqliteBridge`].
    #[must_use]
    pub fn bridge(mut self, bridge: Box<dyn DatabaseBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Resolve assets with `resolver` instead of a bundle rooted at the base
    /// directory.
    #[must_use]
    pub fn asset_resolver(mut self, resolver: Arc<dyn AssetResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Validate the configuration and create the provider, unmounted.
    pub fn build(self) -> Result<DatabaseProvider, SessionError> {
        if self.use_suspense && self.on_error.is_some() {
            return Err(SessionError::ConflictingErrorStrategies);
        }
        self.config.validate()?;

        let resolver = self.resolver.unwrap_or_else(|| {
            Arc::new(BundleResolver::new(self.config.base_directory.clone()))
        });
        let bridge = self
            .bridge
            .unwrap_or_else(|| Box::new(SqliteBridge::new()));
        let (state, _) = watch::channel(SessionState::Uninitialized);
        Ok(DatabaseProvider {
            bridge: Arc::new(Mutex::new(bridge)),
            resolver,
            state,
            use_suspense: self.use_suspense,
            on_error: self.on_error,
            lifecycle: Mutex::new(Lifecycle {
                config: self.config,
                generation: 0,
            }),
        })
    }
}

struct Lifecycle {
    config: ProviderConfig,
    generation: u64,
}

/// Owner of the single connection for one logical database.
///
/// All methods take `&self`, so the provider can be shared behind an `Arc`;
/// lifecycle transitions are serialised internally and never leave two
/// connections open at once.
///
/// # Examples
///
/// ```
/// use lokeshen_core::SqlValue;
/// use lokeshen_data::{DatabaseProvider, SessionError};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), SessionError> {
/// let provider = DatabaseProvider::builder(":memory:").build()?;
/// provider.mount().await?;
///
/// let context = provider.context()?;
/// context
///     .execute_statement("CREATE TABLE notes (id INTEGER PRIMARY KEY, title TEXT)", &[])
///     .await?;
/// context
///     .execute_statement("INSERT INTO notes (title) VALUES (?)", &["Uhuru Park".into()])
///     .await?;
/// let rows = context.execute_query("SELECT title FROM notes", &[]).await?;
/// assert_eq!(rows.rows[0]["title"], SqlValue::from("Uhuru Park"));
///
/// provider.unmount().await?;
/// assert!(context.execute_query("SELECT 1", &[]).await.is_err());
/// # Ok(())
/// # }
/// ```
pub struct DatabaseProvider {
    bridge: SharedBridge,
    resolver: Arc<dyn AssetResolver>,
    state: watch::Sender<SessionState>,
    use_suspense: bool,
    on_error: Option<ErrorHandler>,
    lifecycle: Mutex<Lifecycle>,
}

impl fmt::Debug for DatabaseProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseProvider")
            .field("state", &*self.state.borrow())
            .field("use_suspense", &self.use_suspense)
            .field("on_error", &self.on_error.is_some())
            .finish_non_exhaustive()
    }
}

impl DatabaseProvider {
    /// Start configuring a provider for database `name`.
    pub fn builder(name: impl Into<String>) -> DatabaseProviderBuilder {
        DatabaseProviderBuilder::new(name)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Watch lifecycle transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Snapshot of the active configuration.
    pub async fn config(&self) -> ProviderConfig {
        self.lifecycle.lock().await.config.clone()
    }

    /// Open the database and run the init hook.
    ///
    /// Mounting a ready session is a no-op. On failure the bridge is closed,
    /// the state becomes [`SessionState::Failed`], and the error goes to the
    /// `on_error` handler when one is configured or is returned otherwise.
    pub async fn mount(&self) -> Result<(), SessionError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if matches!(*self.state.borrow(), SessionState::Ready { .. }) {
            debug!("mount ignored; session already ready");
            return Ok(());
        }
        self.open(&mut lifecycle).await
    }

    /// Close the connection and return to [`SessionState::Uninitialized`].
    ///
    /// Contexts issued before the call fail with
    /// [`SessionError::ContextNotReady`] from then on.
    pub async fn unmount(&self) -> Result<(), SessionError> {
        let _lifecycle = self.lifecycle.lock().await;
        self.close().await
    }

    /// Apply `update` to the configuration.
    ///
    /// When the database identity or the init hook changes on a mounted
    /// session, the old connection is fully closed before the new one opens.
    pub async fn reconfigure<F>(&self, update: F) -> Result<(), SessionError>
    where
        F: FnOnce(&mut ProviderConfig),
    {
        let mut lifecycle = self.lifecycle.lock().await;
        let mut next = lifecycle.config.clone();
        update(&mut next);
        next.validate()?;
        if !lifecycle.config.requires_reopen(&next) {
            lifecycle.config = next;
            return Ok(());
        }

        let was_mounted = !matches!(*self.state.borrow(), SessionState::Uninitialized);
        info!(
            "reconfiguring database session from {} to {}",
            lifecycle.config.database_path(),
            next.database_path()
        );
        if was_mounted {
            self.close().await?;
        }
        lifecycle.config = next;
        if was_mounted {
            self.open(&mut lifecycle).await?;
        }
        Ok(())
    }

    /// A context for the ready session, without waiting.
    pub fn context(&self) -> Result<DatabaseContext, SessionError> {
        let state = self.state.borrow().clone();
        match state {
            SessionState::Ready { generation } => Ok(DatabaseContext::new(
                Arc::clone(&self.bridge),
                self.state.subscribe(),
                generation,
            )),
            _ => Err(SessionError::ContextNotReady),
        }
    }

    /// Wait until the session is ready and return a context for it.
    ///
    /// An in-flight mount or reconfiguration is always awaited. While nothing
    /// is mounted, suspense-mode providers keep waiting for a mount and others
    /// fail fast with [`SessionError::ContextNotReady`].
    pub async fn ready(&self) -> Result<DatabaseContext, SessionError> {
        let mut receiver = self.state.subscribe();
        loop {
            let state = receiver.borrow_and_update().clone();
            match state {
                SessionState::Ready { generation } => {
                    return Ok(DatabaseContext::new(
                        Arc::clone(&self.bridge),
                        self.state.subscribe(),
                        generation,
                    ));
                }
                SessionState::Failed { reason } => {
                    return Err(SessionError::InitFailed { reason });
                }
                SessionState::Uninitialized if !self.use_suspense => {
                    return Err(SessionError::ContextNotReady);
                }
                SessionState::Uninitialized
                | SessionState::TearingDown
                | SessionState::Initializing { .. } => {}
            }
            if receiver.changed().await.is_err() {
                return Err(SessionError::ContextNotReady);
            }
        }
    }

    async fn open(&self, lifecycle: &mut Lifecycle) -> Result<(), SessionError> {
        lifecycle.generation = lifecycle.generation.wrapping_add(1);
        let generation = lifecycle.generation;
        self.state
            .send_replace(SessionState::Initializing { generation });

        match self.initialise(&lifecycle.config, generation).await {
            Ok(path) => {
                self.state.send_replace(SessionState::Ready { generation });
                info!("database session ready at {path} (generation {generation})");
                Ok(())
            }
            Err(err) => {
                if let Err(close) = run_blocking(&self.bridge, |bridge| bridge.close_database()).await {
                    warn!("closing after failed initialisation failed: {close}");
                }
                warn!("database session failed to initialise: {err}");
                self.state.send_replace(SessionState::Failed {
                    reason: err.to_string(),
                });
                match &self.on_error {
                    Some(handler) => {
                        handler(&err);
                        Ok(())
                    }
                    None => Err(err),
                }
            }
        }
    }

    async fn initialise(
        &self,
        config: &ProviderConfig,
        generation: u64,
    ) -> Result<Utf8PathBuf, SessionError> {
        let path = config.database_path();
        if let Some(asset) = &config.asset {
            self.import_asset(config, asset.clone()).await?;
        }

        let options = InitOptions {
            read_only: config.read_only,
            spatial: config.spatial.clone(),
        };
        let open_path = path.clone();
        let init = run_blocking(&self.bridge, move |bridge| {
            bridge.init_database(&open_path, &options)
        })
        .await?;
        debug!(
            "opened {} with spatial engine {:?}",
            init.path, init.spatialite_version
        );

        if let Some(hook) = &config.on_init {
            let context =
                DatabaseContext::for_init(Arc::clone(&self.bridge), self.state.subscribe(), generation);
            hook.on_init(&context)
                .await
                .map_err(|source| SessionError::InitHook {
                    source: Box::new(source),
                })?;
        }
        Ok(path)
    }

    async fn import_asset(
        &self,
        config: &ProviderConfig,
        asset: AssetDatabaseSource,
    ) -> Result<(), SessionError> {
        let resolver = Arc::clone(&self.resolver);
        let name = config.name.clone();
        let location = config.location.clone();
        let base = config.base_directory.clone();
        let imported = task::spawn_blocking(move || {
            import_database_from_asset(
                &name,
                &asset,
                location.as_deref(),
                &base,
                resolver.as_ref(),
            )
        })
        .await??;
        if imported.copied {
            info!("seeded {} from bundled asset", imported.path);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), SessionError> {
        if matches!(*self.state.borrow(), SessionState::Uninitialized) {
            return Ok(());
        }
        self.state.send_replace(SessionState::TearingDown);
        let closed = run_blocking(&self.bridge, |bridge| bridge.close_database()).await;
        match closed {
            Ok(result) => {
                debug!("{}", result.message);
                self.state.send_replace(SessionState::Uninitialized);
                Ok(())
            }
            Err(err) => {
                self.state.send_replace(SessionState::Failed {
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Path the active configuration resolves to.
    pub async fn database_path(&self) -> Utf8PathBuf {
        self.lifecycle.lock().await.config.database_path()
    }
}

impl Drop for DatabaseProvider {
    fn drop(&mut self) {
        self.state.send_replace(SessionState::Uninitialized);
        // Contexts may still hold the lock; give up rather than block.
        let Ok(mut bridge) = Arc::clone(&self.bridge).try_lock_owned() else {
            warn!("database still in use while its provider was dropped");
            return;
        };
        let mut close = move || {
            if bridge.is_open()
                && let Err(err) = bridge.close_database()
            {
                warn!("closing database on drop failed: {err}");
            }
        };
        match Handle::try_current() {
            Ok(handle) => drop(handle.spawn_blocking(close)),
            Err(_) => close(),
        }
    }
}
