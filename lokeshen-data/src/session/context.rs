//! Handles through which application code reaches the open connection.

use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use log::{debug, warn};
use lokeshen_core::{
    BridgeError, DatabaseBridge, GeometryColumn, QueryResult, SqlValue, StatementResult,
};
use tokio::runtime::Handle;
use tokio::sync::{Mutex, OwnedMutexGuard, watch};
use tokio::task;

use super::{SessionError, SessionState};

/// The provider's single connection, shared by every context it issues.
pub(crate) type SharedBridge = Arc<Mutex<Box<dyn DatabaseBridge>>>;

type BridgeGuard = OwnedMutexGuard<Box<dyn DatabaseBridge>>;

/// Run `call` against the bridge on the blocking pool.
///
/// Calls queue on the connection lock, so at most one native call runs at a
/// time and the async executor is never blocked by the engine.
pub(crate) async fn run_blocking<T, F>(bridge: &SharedBridge, call: F) -> Result<T, SessionError>
where
    T: Send + 'static,
    F: FnOnce(&mut dyn DatabaseBridge) -> Result<T, BridgeError> + Send + 'static,
{
    let guard = Arc::clone(bridge).lock_owned().await;
    run_guarded(guard, call).await.1
}

async fn run_guarded<T, F>(
    mut guard: BridgeGuard,
    call: F,
) -> (Option<BridgeGuard>, Result<T, SessionError>)
where
    T: Send + 'static,
    F: FnOnce(&mut dyn DatabaseBridge) -> Result<T, BridgeError> + Send + 'static,
{
    let joined = task::spawn_blocking(move || {
        let result = call(&mut **guard);
        (guard, result)
    })
    .await;
    match joined {
        Ok((guard, result)) => (Some(guard), result.map_err(SessionError::from)),
        Err(err) => (None, Err(SessionError::Worker(err))),
    }
}

/// Access to a ready database session.
///
/// Contexts are cheap to clone. Each one is tied to the session generation it
/// was issued for: once that session is torn down or reconfigured, every call
/// fails with [`SessionError::ContextNotReady`] instead of reaching a newer
/// connection.
#[derive(Clone)]
pub struct DatabaseContext {
    bridge: SharedBridge,
    state: watch::Receiver<SessionState>,
    generation: u64,
    during_init: bool,
}

impl fmt::Debug for DatabaseContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseContext")
            .field("generation", &self.generation)
            .field("during_init", &self.during_init)
            .finish_non_exhaustive()
    }
}

impl DatabaseContext {
    pub(super) const fn new(
        bridge: SharedBridge,
        state: watch::Receiver<SessionState>,
        generation: u64,
    ) -> Self {
        Self {
            bridge,
            state,
            generation,
            during_init: false,
        }
    }

    /// A context usable while the session is still initialising, handed to
    /// the `on_init` hook.
    pub(super) const fn for_init(
        bridge: SharedBridge,
        state: watch::Receiver<SessionState>,
        generation: u64,
    ) -> Self {
        Self {
            bridge,
            state,
            generation,
            during_init: true,
        }
    }

    /// Generation of the session this context belongs to.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the session this context was issued for is still live.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.ensure_current().is_ok()
    }

    fn ensure_current(&self) -> Result<(), SessionError> {
        let live = match *self.state.borrow() {
            SessionState::Ready { generation } => generation == self.generation,
            SessionState::Initializing { generation } => {
                self.during_init && generation == self.generation
            }
            SessionState::Uninitialized | SessionState::Failed { .. } | SessionState::TearingDown => {
                false
            }
        };
        if live {
            Ok(())
        } else {
            Err(SessionError::ContextNotReady)
        }
    }

    async fn lock(&self) -> Result<BridgeGuard, SessionError> {
        self.ensure_current()?;
        let guard = Arc::clone(&self.bridge).lock_owned().await;
        // Teardown may have won the race for the lock.
        self.ensure_current()?;
        Ok(guard)
    }

    async fn call<T, F>(&self, call: F) -> Result<T, SessionError>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn DatabaseBridge) -> Result<T, BridgeError> + Send + 'static,
    {
        let guard = self.lock().await?;
        run_guarded(guard, call).await.1
    }

    /// Run a read statement.
    pub async fn execute_query(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<QueryResult, SessionError> {
        let sql = sql.to_owned();
        let params = params.to_vec();
        self.call(move |bridge| bridge.execute_query(&sql, &params))
            .await
    }

    /// Run a write statement inside its own implicit transaction.
    pub async fn execute_statement(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<StatementResult, SessionError> {
        let sql = sql.to_owned();
        let params = params.to_vec();
        self.call(move |bridge| bridge.execute_statement(&sql, &params))
            .await
    }

    /// Read a pragma such as `journal_mode`.
    pub async fn execute_pragma_query(&self, pragma: &str) -> Result<QueryResult, SessionError> {
        let pragma = pragma.to_owned();
        self.call(move |bridge| bridge.execute_pragma_query(&pragma))
            .await
    }

    /// Version reported by the spatial engine.
    pub async fn spatialite_version(&self) -> Result<String, SessionError> {
        self.call(|bridge| bridge.spatialite_version()).await
    }

    /// Create the spatial metadata catalog if it is missing.
    pub async fn init_spatial_metadata(&self) -> Result<(), SessionError> {
        self.call(|bridge| bridge.init_spatial_metadata()).await
    }

    /// Register a geometry column with the spatial metadata catalog.
    pub async fn register_geometry_column(
        &self,
        column: GeometryColumn,
    ) -> Result<(), SessionError> {
        self.call(move |bridge| bridge.register_geometry_column(&column))
            .await
    }

    /// Create a spatial index over a registered geometry column.
    pub async fn create_spatial_index(&self, table: &str, column: &str) -> Result<(), SessionError> {
        let table = table.to_owned();
        let column = column.to_owned();
        self.call(move |bridge| bridge.create_spatial_index(&table, &column))
            .await
    }

    /// Start an explicit transaction.
    ///
    /// The transaction holds the connection until it is committed, rolled
    /// back or dropped; dropping it rolls back.
    pub async fn begin(&self) -> Result<Transaction, SessionError> {
        let guard = self.lock().await?;
        let (guard, result) = run_guarded(guard, |bridge| bridge.execute_statement("BEGIN", &[])).await;
        result?;
        debug!("transaction started (generation {})", self.generation);
        Ok(Transaction { guard })
    }

    /// Run `body` inside a transaction: `COMMIT` when it succeeds,
    /// `ROLLBACK` when it fails.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use futures_util::FutureExt;
    /// use lokeshen_data::{DatabaseContext, SessionError};
    ///
    /// # async fn demo(context: DatabaseContext) -> Result<(), SessionError> {
    /// context
    ///     .transaction(|tx| {
    ///         async move {
    ///             tx.execute_statement("INSERT INTO notes (title) VALUES (?)", &["a".into()])
    ///                 .await?;
    ///             tx.execute_statement("INSERT INTO notes (title) VALUES (?)", &["b".into()])
    ///                 .await?;
    ///             Ok(())
    ///         }
    ///         .boxed()
    ///     })
    ///     .await
    /// # }
    /// ```
    pub async fn transaction<T, F>(&self, body: F) -> Result<T, SessionError>
    where
        F: for<'t> FnOnce(&'t mut Transaction) -> BoxFuture<'t, Result<T, SessionError>>,
    {
        let mut transaction = self.begin().await?;
        match body(&mut transaction).await {
            Ok(value) => {
                transaction.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = transaction.rollback().await {
                    warn!("rollback after failed transaction also failed: {rollback}");
                }
                Err(err)
            }
        }
    }
}

/// An open transaction holding exclusive use of the connection.
pub struct Transaction {
    guard: Option<BridgeGuard>,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("active", &self.guard.is_some())
            .finish()
    }
}

impl Transaction {
    async fn call<T, F>(&mut self, call: F) -> Result<T, SessionError>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn DatabaseBridge) -> Result<T, BridgeError> + Send + 'static,
    {
        let guard = self.guard.take().ok_or(SessionError::TransactionFinished)?;
        let (guard, result) = run_guarded(guard, call).await;
        self.guard = guard;
        result
    }

    /// Run a read statement inside the transaction.
    pub async fn execute_query(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<QueryResult, SessionError> {
        let sql = sql.to_owned();
        let params = params.to_vec();
        self.call(move |bridge| bridge.execute_query(&sql, &params))
            .await
    }

    /// Run a write statement inside the transaction.
    pub async fn execute_statement(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<StatementResult, SessionError> {
        let sql = sql.to_owned();
        let params = params.to_vec();
        self.call(move |bridge| bridge.execute_statement(&sql, &params))
            .await
    }

    /// Commit and release the connection. A failed commit rolls back.
    pub async fn commit(mut self) -> Result<(), SessionError> {
        self.call(|bridge| bridge.execute_statement("COMMIT", &[]))
            .await?;
        self.guard = None;
        debug!("transaction committed");
        Ok(())
    }

    /// Roll back and release the connection.
    pub async fn rollback(mut self) -> Result<(), SessionError> {
        let result = self
            .call(|bridge| bridge.execute_statement("ROLLBACK", &[]))
            .await;
        self.guard = None;
        debug!("transaction rolled back");
        result.map(drop)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let Some(mut guard) = self.guard.take() else {
            return;
        };
        let mut rollback = move || {
            if let Err(err) = guard.execute_statement("ROLLBACK", &[]) {
                warn!("rollback of abandoned transaction failed: {err}");
            }
        };
        match Handle::try_current() {
            Ok(handle) => drop(handle.spawn_blocking(rollback)),
            Err(_) => rollback(),
        }
    }
}
