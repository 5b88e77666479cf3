//! Debounce collector and execution chain.
//!
//! Each intent class (reads, writes) goes through
//! `Idle → Collecting → Scheduled → Running → Settling → Idle`:
//!
//! - **Collecting**: calls join the pending intent and push its deadline out
//!   by the class's debounce window.
//! - **Scheduled**: the deadline passed and the intent sits on the chain.
//! - **Running**: the executor runs hooks, lock and I/O.
//! - **Settling**: change notices are out and callers are being resolved.
//!
//! The collector is a single task selecting over incoming commands and the
//! nearest deadline, so it runs the same under tokio's paused clock.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use jds_events::EventKind;
use jds_types::{merged, Document};

use crate::error::StoreResult;

/// Operation classes with their own debounce window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IntentClass {
    Read,
    Write,
}

impl IntentClass {
    fn index(self) -> usize {
        match self {
            Self::Read => 0,
            Self::Write => 1,
        }
    }
}

/// Observable state of an intent class.
///
/// When several intents of one class are in flight the most advanced state
/// is reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Collecting,
    Scheduled,
    Running,
    Settling,
}

/// A pending write, possibly folded from several calls.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteOp {
    /// Deep-merge the payload into the current document.
    Merge(Document),
    /// Replace the whole document.
    Replace(Document),
    /// Replace the whole document with the default data.
    Reset,
}

impl WriteOp {
    /// Fold a later submission into this one.
    pub fn fold(self, next: WriteOp, default_data: &Document) -> WriteOp {
        match (self, next) {
            (_, next @ (WriteOp::Replace(_) | WriteOp::Reset)) => next,
            (WriteOp::Merge(a), WriteOp::Merge(b)) => WriteOp::Merge(merged(&a, &b)),
            (WriteOp::Replace(a), WriteOp::Merge(b)) => WriteOp::Replace(merged(&a, &b)),
            (WriteOp::Reset, WriteOp::Merge(b)) => WriteOp::Replace(merged(default_data, &b)),
        }
    }

    /// The document this write proposes, given the current one.
    pub fn apply(&self, current: &Document, default_data: &Document) -> Document {
        match self {
            WriteOp::Merge(patch) => merged(current, patch),
            WriteOp::Replace(doc) => doc.clone(),
            WriteOp::Reset => default_data.clone(),
        }
    }

    /// Hook phase this write runs.
    pub fn event_kind(&self) -> EventKind {
        match self {
            WriteOp::Merge(_) => EventKind::Write,
            WriteOp::Replace(_) | WriteOp::Reset => EventKind::Replace,
        }
    }

    /// Operation name carried by events and notices.
    pub fn operation(&self) -> &'static str {
        match self {
            WriteOp::Merge(_) => "write",
            WriteOp::Replace(_) => "replace",
            WriteOp::Reset => "resetToDefault",
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct ClassState {
    collecting: bool,
    scheduled: usize,
    active: Option<Phase>,
}

/// Phase bookkeeping shared by the collector, the executor and `Store::phase`.
#[derive(Debug, Default)]
pub(crate) struct PhaseBoard {
    classes: Mutex<[ClassState; 2]>,
}

impl PhaseBoard {
    fn update(&self, class: IntentClass, f: impl FnOnce(&mut ClassState)) {
        let mut classes = self.classes.lock().expect("phase board poisoned");
        f(&mut classes[class.index()]);
    }

    pub(crate) fn collecting(&self, class: IntentClass) {
        self.update(class, |s| s.collecting = true);
    }

    pub(crate) fn scheduled(&self, class: IntentClass) {
        self.update(class, |s| {
            s.collecting = false;
            s.scheduled += 1;
        });
    }

    pub(crate) fn running(&self, class: IntentClass) {
        self.update(class, |s| {
            s.scheduled = s.scheduled.saturating_sub(1);
            s.active = Some(Phase::Running);
        });
    }

    pub(crate) fn settling(&self, class: IntentClass) {
        self.update(class, |s| s.active = Some(Phase::Settling));
    }

    pub(crate) fn idle(&self, class: IntentClass) {
        self.update(class, |s| s.active = None);
    }

    pub(crate) fn get(&self, class: IntentClass) -> Phase {
        let s = self.classes.lock().expect("phase board poisoned")[class.index()];
        s.active
            .or_else(|| (s.scheduled > 0).then_some(Phase::Scheduled))
            .or_else(|| s.collecting.then_some(Phase::Collecting))
            .unwrap_or(Phase::Idle)
    }
}

pub(crate) type Reply<T> = oneshot::Sender<StoreResult<T>>;
pub(crate) type DocReply = Reply<Option<Document>>;

/// What callers and the watcher send to the collector.
pub(crate) enum Command {
    Read(DocReply),
    Write(WriteOp, DocReply),
    Lock { permanent: bool, reply: Reply<bool> },
    Unlock { permanent: bool, reply: Reply<bool> },
    /// The backing file changed on disk.
    Reconcile,
    /// The watcher hit an error.
    Report(String),
    /// Detach everything pending, answer once the chain reached this point.
    Flush(oneshot::Sender<()>),
}

/// A detached unit of work on the execution chain.
pub(crate) enum Intent {
    Read(Vec<DocReply>),
    Write(WriteOp, Vec<DocReply>),
    Lock { permanent: bool, reply: Reply<bool> },
    Unlock { permanent: bool, reply: Reply<bool> },
    Reconcile,
    Report(String),
    Barrier(oneshot::Sender<()>),
}

/// Debounce windows per class.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Windows {
    pub read: Duration,
    pub write: Duration,
}

struct Pending<T> {
    payload: T,
    waiters: Vec<DocReply>,
    deadline: Instant,
}

/// Collects submissions into per-class intents and detaches them onto the
/// chain when their window closes.
pub(crate) struct Collector {
    windows: Windows,
    default_data: Document,
    phases: Arc<PhaseBoard>,
    chain: mpsc::UnboundedSender<Intent>,
    reads: Option<Pending<()>>,
    writes: Option<Pending<WriteOp>>,
}

impl Collector {
    pub(crate) fn new(
        windows: Windows,
        default_data: Document,
        phases: Arc<PhaseBoard>,
        chain: mpsc::UnboundedSender<Intent>,
    ) -> Self {
        Self {
            windows,
            default_data,
            phases,
            chain,
            reads: None,
            writes: None,
        }
    }

    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            let next = self.next_deadline();
            tokio::select! {
                biased;
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.accept(cmd),
                    None => {
                        self.detach_all();
                        break;
                    }
                },
                _ = sleep_until(next.unwrap_or_else(far_future)), if next.is_some() => {
                    self.detach_due(Instant::now());
                }
            }
        }
        debug!("collector stopped");
    }

    fn accept(&mut self, cmd: Command) {
        let now = Instant::now();
        match cmd {
            Command::Read(reply) => {
                let mut pending = self.reads.take().unwrap_or_else(|| {
                    self.phases.collecting(IntentClass::Read);
                    Pending {
                        payload: (),
                        waiters: Vec::new(),
                        deadline: now,
                    }
                });
                pending.waiters.push(reply);
                pending.deadline = now + self.windows.read;
                self.reads = Some(pending);
            }
            Command::Write(op, reply) => match self.writes.take() {
                Some(pending) => {
                    let mut waiters = pending.waiters;
                    waiters.push(reply);
                    self.writes = Some(Pending {
                        payload: pending.payload.fold(op, &self.default_data),
                        waiters,
                        deadline: now + self.windows.write,
                    });
                }
                None => {
                    self.phases.collecting(IntentClass::Write);
                    self.writes = Some(Pending {
                        payload: op,
                        waiters: vec![reply],
                        deadline: now + self.windows.write,
                    });
                }
            },
            Command::Lock { permanent, reply } => self.send(Intent::Lock { permanent, reply }),
            Command::Unlock { permanent, reply } => self.send(Intent::Unlock { permanent, reply }),
            Command::Reconcile => self.send(Intent::Reconcile),
            Command::Report(message) => self.send(Intent::Report(message)),
            Command::Flush(done) => {
                self.detach_all();
                self.send(Intent::Barrier(done));
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        let reads = self.reads.as_ref().map(|p| p.deadline);
        let writes = self.writes.as_ref().map(|p| p.deadline);
        match (reads, writes) {
            (Some(r), Some(w)) => Some(r.min(w)),
            (r, w) => r.or(w),
        }
    }

    fn detach_due(&mut self, now: Instant) {
        let reads_due = self.reads.as_ref().is_some_and(|p| p.deadline <= now);
        let writes_due = self.writes.as_ref().is_some_and(|p| p.deadline <= now);
        match (reads_due, writes_due) {
            (true, true) => self.detach_all(),
            (true, false) => self.detach_reads(),
            (false, true) => self.detach_writes(),
            (false, false) => {}
        }
    }

    /// Detach both classes, earliest deadline first.
    fn detach_all(&mut self) {
        let writes_first = match (&self.reads, &self.writes) {
            (Some(r), Some(w)) => w.deadline < r.deadline,
            _ => false,
        };
        if writes_first {
            self.detach_writes();
            self.detach_reads();
        } else {
            self.detach_reads();
            self.detach_writes();
        }
    }

    fn detach_reads(&mut self) {
        if let Some(pending) = self.reads.take() {
            debug!(callers = pending.waiters.len(), "read intent detached");
            self.phases.scheduled(IntentClass::Read);
            self.send(Intent::Read(pending.waiters));
        }
    }

    fn detach_writes(&mut self) {
        if let Some(pending) = self.writes.take() {
            debug!(
                operation = pending.payload.operation(),
                callers = pending.waiters.len(),
                "write intent detached"
            );
            self.phases.scheduled(IntentClass::Write);
            self.send(Intent::Write(pending.payload, pending.waiters));
        }
    }

    fn send(&self, intent: Intent) {
        // A closed chain drops the intent; its callers observe `Closed`.
        if self.chain.send(intent).is_err() {
            debug!("execution chain closed, intent dropped");
        }
    }
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400 * 365)
}
