use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use jds_backend::{BackendResult, BackingStore, JsonFileStore};
use jds_events::{current_scope, EventKind, EventPipeline, Hook, HookId, Notice, Origin, Outcome};
use jds_lock::{default_holder, lock_path_for, LockManager};
use jds_search::{Matches, Query, SearchOptions};
use jds_types::{deep_equal, Document};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::registry::{RegistryRef, StoreRegistry};
use crate::scheduler::{
    Collector, Command, DocReply, Intent, IntentClass, Phase, PhaseBoard, Reply, Windows, WriteOp,
};
use crate::watcher::{ChangeWatcher, WatchSignals};

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// How an intent runs: queued on the chain, or inline from a hook of the
/// same store.
#[derive(Clone, Copy, Debug)]
struct Mode {
    hooks: bool,
    tracked: bool,
}

impl Mode {
    const QUEUED: Mode = Mode {
        hooks: true,
        tracked: true,
    };

    fn settle(self, phases: &PhaseBoard, class: IntentClass) {
        if self.tracked {
            phases.settling(class);
        }
    }
}

/// What a cancelled hook phase hands back to callers, or `None` to proceed.
fn resolution(outcome: Outcome) -> Option<Option<Document>> {
    match outcome {
        Outcome::Continue => None,
        Outcome::Cancelled => Some(None),
        Outcome::Overridden(value) => Some(Some(value)),
    }
}

fn resolve<T: Clone>(waiters: Vec<Reply<T>>, result: StoreResult<T>) {
    for waiter in waiters {
        // The caller may have stopped waiting.
        let _ = waiter.send(result.clone());
    }
}

/// State owned by the execution chain.
///
/// Only the executor task (and hooks running on it) mutate `memory` and
/// `snapshot`.
struct Inner {
    id: u64,
    default_data: Document,
    backend: Arc<dyn BackingStore>,
    lock: Option<LockManager>,
    memory: RwLock<Document>,
    /// Last document confirmed on disk, `None` while the file is absent.
    snapshot: RwLock<Option<Document>>,
    self_write: Arc<AtomicBool>,
    pipeline: EventPipeline,
    phases: Arc<PhaseBoard>,
}

impl Inner {
    fn memory(&self) -> Document {
        self.memory.read().expect("document lock poisoned").clone()
    }

    /// Replace the in-memory document, returning the previous one.
    fn adopt(&self, doc: Document) -> Document {
        std::mem::replace(&mut *self.memory.write().expect("document lock poisoned"), doc)
    }

    fn snapshot(&self) -> Option<Document> {
        self.snapshot.read().expect("snapshot lock poisoned").clone()
    }

    fn set_snapshot(&self, raw: Option<Document>) {
        *self.snapshot.write().expect("snapshot lock poisoned") = raw;
    }

    /// Run backing store I/O under the cross-process lock.
    async fn locked<T>(
        &self,
        io: impl FnOnce(&dyn BackingStore) -> BackendResult<T>,
    ) -> StoreResult<T> {
        if let Some(lock) = &self.lock {
            lock.acquire().await?;
        }
        let result = io(self.backend.as_ref());
        let released = match &self.lock {
            Some(lock) => lock.release(),
            None => Ok(()),
        };
        let value = result?;
        released?;
        Ok(value)
    }

    /// First load on open: no hooks, no notices.
    async fn load(&self) -> StoreResult<()> {
        let raw = self.locked(|backend| backend.read()).await?;
        self.adopt(raw.clone().unwrap_or_else(|| self.default_data.clone()));
        self.set_snapshot(raw);
        Ok(())
    }

    async fn execute(&self, intent: Intent) {
        match intent {
            Intent::Read(waiters) => {
                self.phases.running(IntentClass::Read);
                debug!(store = self.id, callers = waiters.len(), "read intent running");
                let result = self.run_read(Mode::QUEUED).await;
                let result = self.report("read", result, true).await;
                resolve(waiters, result);
                self.phases.idle(IntentClass::Read);
            }
            Intent::Write(op, waiters) => {
                self.phases.running(IntentClass::Write);
                let operation = op.operation();
                debug!(store = self.id, operation, callers = waiters.len(), "write intent running");
                let result = self.run_write(op, Mode::QUEUED).await;
                let result = self.report(operation, result, true).await;
                resolve(waiters, result);
                self.phases.idle(IntentClass::Write);
            }
            Intent::Lock { permanent, reply } => {
                let result = self.run_lock(permanent, Mode::QUEUED).await;
                let _ = reply.send(self.report("lock", result, true).await);
            }
            Intent::Unlock { permanent, reply } => {
                let result = self.run_unlock(permanent, Mode::QUEUED).await;
                let _ = reply.send(self.report("unlock", result, true).await);
            }
            Intent::Reconcile => {
                let result = self.reconcile().await;
                let _ = self.report("watch", result, true).await;
            }
            Intent::Report(message) => {
                warn!(store = self.id, error = %message, "watcher error");
                self.pipeline.notify_error("watch", message, true).await;
            }
            Intent::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }

    async fn report<T>(&self, operation: &str, result: StoreResult<T>, hooks: bool) -> StoreResult<T> {
        if let Err(e) = &result {
            warn!(store = self.id, operation, error = %e, "operation failed");
            self.pipeline.notify_error(operation, e.to_string(), hooks).await;
        }
        result
    }

    async fn run_read(&self, mode: Mode) -> StoreResult<Option<Document>> {
        if mode.hooks {
            let current = self.memory();
            let dispatched = self
                .pipeline
                .dispatch(EventKind::Read, "read", current.clone(), current)
                .await;
            if let Some(resolved) = resolution(dispatched.outcome) {
                debug!(store = self.id, "read cancelled by hook");
                return Ok(resolved);
            }
        }

        let raw = self.locked(|backend| backend.read()).await?;
        let doc = raw.clone().unwrap_or_else(|| self.default_data.clone());
        self.set_snapshot(raw);
        let before = self.adopt(doc.clone());

        mode.settle(&self.phases, IntentClass::Read);
        if !deep_equal(&before, &doc) {
            self.pipeline
                .notify_change("read", Origin::External, &before, &doc, mode.hooks)
                .await;
        }
        Ok(Some(doc))
    }

    async fn run_write(&self, op: WriteOp, mode: Mode) -> StoreResult<Option<Document>> {
        let operation = op.operation();
        let before = self.memory();
        let mut proposed = op.apply(&before, &self.default_data);

        if mode.hooks {
            let dispatched = self
                .pipeline
                .dispatch(op.event_kind(), operation, before.clone(), proposed)
                .await;
            if let Some(resolved) = resolution(dispatched.outcome) {
                debug!(store = self.id, operation, "write cancelled by hook");
                return Ok(resolved);
            }
            proposed = dispatched.event.into_proposed();
        }

        self.self_write.store(true, Ordering::SeqCst);
        let written = self.locked(|backend| backend.write(&proposed)).await;
        if let Err(e) = written {
            self.self_write.store(false, Ordering::SeqCst);
            return Err(e);
        }
        self.adopt(proposed.clone());
        self.set_snapshot(Some(proposed.clone()));
        self.self_write.store(false, Ordering::SeqCst);

        mode.settle(&self.phases, IntentClass::Write);
        self.pipeline
            .notify_change(operation, Origin::Internal, &before, &proposed, mode.hooks)
            .await;
        Ok(Some(proposed))
    }

    async fn run_lock(&self, permanent: bool, mode: Mode) -> StoreResult<bool> {
        if mode.hooks && !self.hooks_continue(EventKind::Lock, "lock").await {
            return Ok(false);
        }
        if let Some(lock) = &self.lock {
            if permanent {
                lock.pin().await?;
            } else {
                lock.acquire().await?;
            }
        }
        Ok(true)
    }

    async fn run_unlock(&self, permanent: bool, mode: Mode) -> StoreResult<bool> {
        if mode.hooks && !self.hooks_continue(EventKind::Unlock, "unlock").await {
            return Ok(false);
        }
        if let Some(lock) = &self.lock {
            if permanent {
                lock.unpin()?;
            } else {
                lock.release()?;
            }
        }
        Ok(true)
    }

    async fn hooks_continue(&self, kind: EventKind, operation: &str) -> bool {
        let current = self.memory();
        let dispatched = self
            .pipeline
            .dispatch(kind, operation, current.clone(), current)
            .await;
        dispatched.outcome.is_continue()
    }

    /// Adopt whatever another process left in the backing store.
    async fn reconcile(&self) -> StoreResult<()> {
        if self.self_write.load(Ordering::SeqCst) {
            debug!(store = self.id, "own write in flight, reconcile skipped");
            return Ok(());
        }

        let raw = self.backend.read()?;
        let unchanged = match (&raw, &self.snapshot()) {
            (Some(fresh), Some(known)) => deep_equal(fresh, known),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            self.set_snapshot(raw);
            return Ok(());
        }
        if self.self_write.load(Ordering::SeqCst) {
            return Ok(());
        }

        let doc = raw.clone().unwrap_or_else(|| self.default_data.clone());
        self.set_snapshot(raw);
        let before = self.adopt(doc.clone());
        info!(store = self.id, "external change adopted");
        self.pipeline
            .notify_change("watch", Origin::External, &before, &doc, true)
            .await;
        Ok(())
    }
}

async fn run_executor(inner: Arc<Inner>, mut chain: mpsc::UnboundedReceiver<Intent>) {
    while let Some(intent) = chain.recv().await {
        inner.execute(intent).await;
    }
    debug!(store = inner.id, "executor stopped");
}

struct Shared {
    inner: Arc<Inner>,
    commands: mpsc::UnboundedSender<Command>,
    path: Option<PathBuf>,
    watcher: Mutex<Option<ChangeWatcher>>,
    registry: Mutex<Option<RegistryRef>>,
    closed: AtomicBool,
}

/// Handle to one JSON document store.
///
/// Cheap to clone; clones share the same document, hooks and chain.
/// Every document crossing this API is a copy.
#[derive(Clone)]
pub struct Store {
    shared: Arc<Shared>,
}

impl Store {
    /// Open the JSON file named by `config.path`.
    pub async fn open(config: StoreConfig) -> StoreResult<Self> {
        Self::start(Self::file_backend(&config)?, config, None).await
    }

    /// Open the JSON file named by `config.path` and register the store.
    pub async fn open_in(config: StoreConfig, registry: &StoreRegistry) -> StoreResult<Self> {
        Self::start(Self::file_backend(&config)?, config, Some(registry)).await
    }

    /// Open a store over any backend. `config.path` is ignored; locking and
    /// watching follow [`BackingStore::path`].
    pub async fn with_backend(
        backend: impl BackingStore + 'static,
        config: StoreConfig,
    ) -> StoreResult<Self> {
        Self::start(Arc::new(backend), config, None).await
    }

    fn file_backend(config: &StoreConfig) -> StoreResult<Arc<dyn BackingStore>> {
        let path = config
            .path
            .clone()
            .ok_or_else(|| StoreError::Config("no backing file path configured".into()))?;
        Ok(Arc::new(JsonFileStore::new(path).pretty(config.pretty)))
    }

    async fn start(
        backend: Arc<dyn BackingStore>,
        config: StoreConfig,
        registry: Option<&StoreRegistry>,
    ) -> StoreResult<Self> {
        let id = NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed);
        let path = backend.path().map(Path::to_path_buf);
        let lock = path
            .as_deref()
            .map(|p| LockManager::new(lock_path_for(p), config.lock.clone(), default_holder()));
        let phases = Arc::new(PhaseBoard::default());

        let inner = Arc::new(Inner {
            id,
            default_data: config.default_data.clone(),
            backend,
            lock,
            memory: RwLock::new(config.default_data.clone()),
            snapshot: RwLock::new(None),
            self_write: Arc::new(AtomicBool::new(false)),
            pipeline: EventPipeline::new(id, config.broadcast_capacity),
            phases: Arc::clone(&phases),
        });
        inner.load().await?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (chain, chain_rx) = mpsc::unbounded_channel();
        let windows = Windows {
            read: config.read_debounce(),
            write: config.write_debounce(),
        };
        tokio::spawn(Collector::new(windows, config.default_data.clone(), phases, chain).run(command_rx));
        tokio::spawn(run_executor(Arc::clone(&inner), chain_rx));

        let watcher = match &path {
            Some(p) if config.watch.enabled => Some(ChangeWatcher::start(
                p.clone(),
                config.watch.clone(),
                WatchSignals::new(commands.clone(), Arc::clone(&inner.self_write)),
            )),
            _ => None,
        };

        info!(store = id, path = ?path, watching = watcher.is_some(), "store opened");
        let store = Self {
            shared: Arc::new(Shared {
                inner,
                commands,
                path,
                watcher: Mutex::new(watcher),
                registry: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        };
        if let Some(registry) = registry {
            registry.register(&store);
        }
        Ok(store)
    }

    /// Process-unique id of this store.
    pub fn id(&self) -> u64 {
        self.shared.inner.id
    }

    pub fn path(&self) -> Option<&Path> {
        self.shared.path.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn phase(&self, class: IntentClass) -> Phase {
        self.shared.inner.phases.get(class)
    }

    /// The in-memory document, without I/O or hooks.
    pub fn document(&self) -> Document {
        self.shared.inner.memory()
    }

    /// Whether this process currently holds the lock file.
    pub fn is_locked(&self) -> bool {
        self.shared.inner.lock.as_ref().is_some_and(LockManager::is_held)
    }

    pub fn on<H: Hook + 'static>(&self, kind: EventKind, hook: H) -> HookId {
        self.shared.inner.pipeline.on(kind, hook)
    }

    pub fn off(&self, kind: EventKind, id: HookId) -> bool {
        self.shared.inner.pipeline.off(kind, id)
    }

    /// Change and error notices.
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.shared.inner.pipeline.subscribe()
    }

    pub(crate) fn set_registry(&self, registry: Option<RegistryRef>) {
        *self.shared.registry.lock().expect("registry slot poisoned") = registry;
    }

    /// Inline mode when called from a hook of this store.
    fn inline(&self) -> Option<Mode> {
        current_scope()
            .filter(|scope| scope.owner() == self.id())
            .map(|scope| Mode {
                hooks: !scope.is_suppressed(),
                tracked: false,
            })
    }

    async fn submit<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> StoreResult<T> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        let (tx, rx) = oneshot::channel();
        self.shared
            .commands
            .send(command(tx))
            .map_err(|_| StoreError::Closed)?;
        rx.await.map_err(|_| StoreError::Closed)?
    }

    /// Re-read the backing file and return the document.
    ///
    /// `None` when a read hook cancelled without an override. Read hooks
    /// cannot reshape the result other than through `set_result`; edits to
    /// the event's proposed document are dropped.
    pub async fn read(&self) -> StoreResult<Option<Document>> {
        if let Some(mode) = self.inline() {
            let inner = &self.shared.inner;
            let result = inner.run_read(mode).await;
            return inner.report("read", result, mode.hooks).await;
        }
        self.submit(Command::Read).await
    }

    /// Alias of [`Store::read`].
    pub async fn get_all(&self) -> StoreResult<Option<Document>> {
        self.read().await
    }

    /// Deep-merge `partial` into the document.
    pub async fn write(&self, partial: Document) -> StoreResult<Option<Document>> {
        self.submit_write(WriteOp::Merge(partial)).await
    }

    /// Replace the whole document.
    pub async fn replace(&self, doc: Document) -> StoreResult<Option<Document>> {
        self.submit_write(WriteOp::Replace(doc)).await
    }

    /// Replace the whole document with the configured default data.
    pub async fn reset_to_default(&self) -> StoreResult<Option<Document>> {
        self.submit_write(WriteOp::Reset).await
    }

    async fn submit_write(&self, op: WriteOp) -> StoreResult<Option<Document>> {
        if let Some(mode) = self.inline() {
            let inner = &self.shared.inner;
            let operation = op.operation();
            let result = inner.run_write(op, mode).await;
            return inner.report(operation, result, mode.hooks).await;
        }
        self.submit(|reply: DocReply| Command::Write(op, reply)).await
    }

    /// Search the freshly read document.
    ///
    /// If a read hook cancels without an override, the in-memory document
    /// is searched instead.
    pub async fn find_matches(
        &self,
        query: impl Into<Query>,
        options: &SearchOptions,
    ) -> StoreResult<Matches> {
        let query = query.into();
        let doc = match self.read().await? {
            Some(doc) => doc,
            None => self.document(),
        };
        Ok(jds_search::find_matches(&doc, &query, options)?)
    }

    /// Take the lock file. A permanent lock survives the per-operation
    /// releases until `unlock(true)`; otherwise the next operation's release
    /// drops it. `Ok(false)` when a hook cancelled.
    pub async fn lock(&self, permanent: bool) -> StoreResult<bool> {
        if let Some(mode) = self.inline() {
            let inner = &self.shared.inner;
            let result = inner.run_lock(permanent, mode).await;
            return inner.report("lock", result, mode.hooks).await;
        }
        self.submit(|reply| Command::Lock { permanent, reply }).await
    }

    /// Release the lock file. `unlock(false)` leaves a permanent lock alone.
    pub async fn unlock(&self, permanent: bool) -> StoreResult<bool> {
        if let Some(mode) = self.inline() {
            let inner = &self.shared.inner;
            let result = inner.run_unlock(permanent, mode).await;
            return inner.report("unlock", result, mode.hooks).await;
        }
        self.submit(|reply| Command::Unlock { permanent, reply }).await
    }

    /// Flush pending intents, wait for the chain to drain, stop watching,
    /// release the lock file and leave the registry.
    ///
    /// Idempotent. Later operations fail with [`StoreError::Closed`].
    pub async fn close(&self) -> StoreResult<()> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let (done, drained) = oneshot::channel();
        if self.shared.commands.send(Command::Flush(done)).is_ok() && self.inline().is_none() {
            // From inside a hook the chain cannot drain before we return.
            let _ = drained.await;
        }

        let watcher = self.shared.watcher.lock().expect("watcher slot poisoned").take();
        drop(watcher);

        let released = match &self.shared.inner.lock {
            Some(lock) => lock.force_release(),
            None => Ok(()),
        };

        let registry = self
            .shared
            .registry
            .lock()
            .expect("registry slot poisoned")
            .take()
            .and_then(|r| r.upgrade());
        if let Some(registry) = registry {
            registry.unregister(self.id());
        }

        info!(store = self.id(), "store closed");
        released.map_err(StoreError::from)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.id())
            .field("path", &self.shared.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}
