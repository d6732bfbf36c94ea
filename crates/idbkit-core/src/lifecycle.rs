//! Connection lifecycle: open, upgrade, recover, close, delete
//!
//! The live handle lives in a [`HandleState`] owned here. Operations borrow a
//! clone of it through [`Lifecycle::handle`], which is the single guard every
//! operation goes through.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::config::{InitOptions, Recovery};
use crate::diag::{DiagnosticSink, Diagnostics, Level};
use crate::engine::{EngineResult, StorageEngine, UpgradeContext, UpgradeFn, VersionChange};
use crate::error::{Error, Result};
use crate::schema::DatabaseSchema;

/// Connection state, without the handle itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// `initialize` has not succeeded yet.
    Uninitialized,
    Open,
    /// Closed explicitly, or the database was deleted.
    Closed,
}

#[derive(Debug)]
enum HandleState<H> {
    Uninitialized,
    Open(H),
    Closed,
}

impl<H> HandleState<H> {
    fn state(&self) -> State {
        match self {
            HandleState::Uninitialized => State::Uninitialized,
            HandleState::Open(_) => State::Open,
            HandleState::Closed => State::Closed,
        }
    }
}

/// Create every store (and its indexes) the schema declares but the database
/// lacks. Stores already present are left untouched, so re-running is a no-op.
///
/// Returns the names of the stores created.
pub fn apply_schema(
    ctx: &mut dyn UpgradeContext,
    schema: &DatabaseSchema,
) -> EngineResult<Vec<String>> {
    let mut created = Vec::new();
    for store in &schema.stores {
        if ctx.has_store(&store.name) {
            continue;
        }
        ctx.create_store(&store.name, &store.options)?;
        for index in &store.indexes {
            ctx.create_index(&store.name, &index.name, &index.key_path(), &index.options)?;
        }
        created.push(store.name.clone());
    }
    Ok(created)
}

pub(crate) struct Lifecycle<E: StorageEngine> {
    engine: E,
    schema: Rc<DatabaseSchema>,
    state: RefCell<HandleState<E::Handle>>,
    options: Cell<InitOptions>,
    /// Set by a failed `initialize` that asked for delete-and-reopen.
    recovery_pending: Cell<bool>,
    diag: Diagnostics,
}

impl<E: StorageEngine> Lifecycle<E> {
    pub(crate) fn new(
        engine: E,
        schema: DatabaseSchema,
        sink: Option<Rc<dyn DiagnosticSink>>,
    ) -> Self {
        Self {
            engine,
            schema: Rc::new(schema),
            state: RefCell::new(HandleState::Uninitialized),
            options: Cell::new(InitOptions::default()),
            recovery_pending: Cell::new(false),
            diag: Diagnostics::new(sink),
        }
    }

    pub(crate) fn engine(&self) -> &E {
        &self.engine
    }

    pub(crate) fn schema(&self) -> &DatabaseSchema {
        &self.schema
    }

    pub(crate) fn diag(&self) -> &Diagnostics {
        &self.diag
    }

    pub(crate) fn set_sink(&mut self, sink: Option<Rc<dyn DiagnosticSink>>) {
        self.diag.set_sink(sink);
    }

    pub(crate) fn options(&self) -> InitOptions {
        self.options.get()
    }

    pub(crate) fn state(&self) -> State {
        self.state.borrow().state()
    }

    /// The live handle, or `Error::Unavailable` if there is none.
    pub(crate) fn handle(&self) -> Result<E::Handle> {
        match &*self.state.borrow() {
            HandleState::Open(handle) => Ok(handle.clone()),
            _ => Err(Error::Unavailable),
        }
    }

    pub(crate) async fn initialize(&self, options: InitOptions) -> Result<E::Handle> {
        self.schema.validate()?;
        self.recovery_pending.set(false);
        self.options.set(options);
        self.diag.set_enabled(options.debug);

        // Our own open connection would block a version change.
        self.release().await;

        match self.open().await {
            Ok(handle) => Ok(handle),
            Err(err) => {
                let name = &self.schema.name;
                self.diag
                    .emit(Level::Danger, || format!("{} failed to open: {}", name, err));
                if options.recovery == Recovery::DeleteAndReopen {
                    self.recovery_pending.set(true);
                }
                Err(err.into())
            }
        }
    }

    async fn open(&self) -> EngineResult<E::Handle> {
        let schema = self.schema.clone();
        let diag = self.diag.clone();
        let upgrade: UpgradeFn = Box::new(
            move |ctx: &mut dyn UpgradeContext, change: VersionChange| {
                diag.emit(Level::Primary, || {
                    format!(
                        "upgrading {} from version {} to {}",
                        schema.name, change.old_version, change.new_version
                    )
                });
                let created = apply_schema(ctx, &schema)?;
                tracing::debug!(database = %schema.name, ?created, "schema applied");
                Ok(())
            },
        );

        tracing::debug!(database = %self.schema.name, version = self.schema.version, "opening");
        let handle = self
            .engine
            .open(&self.schema.name, self.schema.version, upgrade)
            .await?;
        self.state.replace(HandleState::Open(handle.clone()));
        let name = &self.schema.name;
        self.diag
            .emit(Level::Success, || format!("{} opened", name));
        Ok(handle)
    }

    pub(crate) fn recovery_pending(&self) -> bool {
        self.recovery_pending.get()
    }

    /// Delete the database and open it once more. Runs at most once per failed
    /// `initialize`; without a pending recovery it does nothing.
    pub(crate) async fn recover(&self) -> Result<()> {
        if !self.recovery_pending.replace(false) {
            return Ok(());
        }
        let name = &self.schema.name;
        tracing::warn!(database = %name, "open failed, deleting database and reopening");

        if let Err(err) = self.delete(name).await {
            tracing::warn!(database = %name, error = %err, "recovery could not delete database");
            return Err(err.into());
        }
        if let Err(err) = self.open().await {
            self.diag
                .emit(Level::Danger, || format!("{} failed to reopen: {}", name, err));
            tracing::warn!(database = %name, error = %err, "recovery could not reopen database");
            return Err(err.into());
        }
        Ok(())
    }

    /// Close the live handle, if any, and mark the state closed.
    async fn release(&self) {
        let handle = match self.state.replace(HandleState::Closed) {
            HandleState::Open(handle) => handle,
            other => {
                self.state.replace(other);
                return;
            }
        };
        if let Err(err) = self.engine.close(&handle).await {
            tracing::warn!(database = %self.schema.name, error = %err, "close failed");
        }
    }

    pub(crate) async fn close(&self) -> Result<()> {
        let handle = match self.state.replace(HandleState::Closed) {
            HandleState::Open(handle) => handle,
            other => {
                self.state.replace(other);
                return Err(Error::Unavailable);
            }
        };
        self.engine.close(&handle).await?;
        let name = &self.schema.name;
        self.diag.emit(Level::Danger, || format!("{} closed", name));
        Ok(())
    }

    pub(crate) async fn delete_db(&self, name: &str) -> Result<()> {
        if name == self.schema.name {
            self.release().await;
        }
        self.delete(name).await.map_err(Error::from)
    }

    async fn delete(&self, name: &str) -> EngineResult<()> {
        match self.engine.delete_database(name).await {
            Ok(()) => {
                self.diag
                    .emit(Level::Success, || format!("{} deleted", name));
                Ok(())
            }
            Err(err) => {
                self.diag
                    .emit(Level::Danger, || format!("{} could not be deleted: {}", name, err));
                Err(err)
            }
        }
    }
}
