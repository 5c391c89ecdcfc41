//! Build scheduling.
//!
//! A [`BuildService`] owns the package graph on a single scheduler
//! thread and serializes all access to it through a request channel.
//! That one thread gives the dev server its concurrency story for
//! free: at most one build runs at a time, resolves are answered in
//! arrival order, and a resolve enqueued after a change batch always
//! observes that batch's build. A change batch arriving mid-build
//! supersedes the running pass, which is abandoned between packages
//! and restarted against the newer sources.

pub mod events;

pub use events::EventHub;

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::asset::{AssetId, SourceChange};
use crate::graph::{BuildResult, PackageGraph, Resolved};

/// A fatal condition reported by a background component, ending the
/// serve session.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FatalError {
    /// The filesystem watcher died.
    #[error("watch error: {0}")]
    Watch(String),
    /// An invariant was violated inside the service.
    #[error("internal error: {0}")]
    Internal(String),
}

/// One request to the scheduler thread.
enum Request {
    /// Source changes to apply, triggering a rebuild.
    Changed(Vec<SourceChange>),
    /// Resolve one asset against the current graph.
    Resolve(AssetId, Sender<Resolved>),
    /// Run a full build and report its result.
    BuildAll(Sender<BuildResult>),
    /// Stop the scheduler thread.
    Shutdown,
}

/// Handle to the scheduler thread.
pub struct BuildService {
    tx: Sender<Request>,
    results: Arc<EventHub<BuildResult>>,
    fatal: Arc<EventHub<FatalError>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BuildService {
    /// Take ownership of the graph and start the scheduler thread.
    pub fn start(graph: PackageGraph) -> Self {
        let (tx, rx) = mpsc::channel();
        let results = Arc::new(EventHub::default());
        let hub = Arc::clone(&results);
        let handle = std::thread::spawn(move || run_scheduler(graph, rx, hub));

        Self {
            tx,
            results,
            fatal: Arc::new(EventHub::default()),
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Queue a batch of source changes. The rebuild happens on the
    /// scheduler thread; subscribe for its result.
    pub fn notify_changes(&self, changes: Vec<SourceChange>) {
        if !changes.is_empty() {
            let _ = self.tx.send(Request::Changed(changes));
        }
    }

    /// Resolve one asset, blocking until every change enqueued before
    /// this call has been built. `None` means the service has shut
    /// down.
    pub fn resolve(&self, id: AssetId) -> Option<Resolved> {
        let (reply, rx) = mpsc::channel();
        self.tx.send(Request::Resolve(id, reply)).ok()?;
        rx.recv().ok()
    }

    /// Run a full build, forcing lazy outputs, and wait for its result.
    pub fn build_all(&self) -> Option<BuildResult> {
        let (reply, rx) = mpsc::channel();
        self.tx.send(Request::BuildAll(reply)).ok()?;
        rx.recv().ok()
    }

    /// Receive the result of every completed rebuild.
    pub fn subscribe_results(&self) -> Receiver<BuildResult> {
        self.results.subscribe()
    }

    /// Receive fatal errors reported by background components.
    pub fn subscribe_fatal(&self) -> Receiver<FatalError> {
        self.fatal.subscribe()
    }

    /// Report a fatal condition to every subscriber.
    pub fn report_fatal(&self, error: FatalError) {
        self.fatal.publish(error);
    }

    /// Stop the scheduler thread and wait for it to exit.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Request::Shutdown);
        let handle = {
            let mut slot = self.handle.lock().unwrap_or_else(|e| e.into_inner());
            slot.take()
        };
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

/// Scheduler loop. Requests are served strictly in arrival order;
/// consecutive change batches are coalesced into one rebuild.
fn run_scheduler(
    mut graph: PackageGraph,
    rx: Receiver<Request>,
    results: Arc<EventHub<BuildResult>>,
) {
    let mut pending: VecDeque<Request> = VecDeque::new();

    loop {
        let request = match pending.pop_front() {
            Some(request) => request,
            None => match rx.recv() {
                Ok(request) => request,
                Err(_) => break,
            },
        };

        match request {
            Request::Changed(mut changes) => {
                coalesce_changes(&mut changes, &mut pending, &rx);
                graph.apply_changes(changes);

                let mut interrupt = || {
                    drain_into(&mut pending, &rx);
                    pending.iter().any(|r| matches!(r, Request::Changed(_)))
                };
                if let Some(result) = graph.build_pass(false, &mut interrupt) {
                    results.publish(result);
                }
                // A superseding batch is now in `pending`; the next
                // iteration picks it up.
            }
            Request::Resolve(id, reply) => {
                let _ = reply.send(graph.get(&id));
            }
            Request::BuildAll(reply) => {
                let _ = reply.send(graph.build_all());
            }
            Request::Shutdown => break,
        }
    }
}

/// Fold immediately-following change batches into `changes`, stopping
/// at the first request of another kind.
fn coalesce_changes(
    changes: &mut Vec<SourceChange>,
    pending: &mut VecDeque<Request>,
    rx: &Receiver<Request>,
) {
    loop {
        if matches!(pending.front(), Some(Request::Changed(_))) {
            if let Some(Request::Changed(more)) = pending.pop_front() {
                changes.extend(more);
            }
            continue;
        }
        if !pending.is_empty() {
            break;
        }
        match rx.try_recv() {
            Ok(Request::Changed(more)) => changes.extend(more),
            Ok(other) => {
                pending.push_back(other);
                break;
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
        }
    }
}

/// Move everything currently queued on the channel into `pending`.
fn drain_into(pending: &mut VecDeque<Request>, rx: &Receiver<Request>) {
    while let Ok(request) = rx.try_recv() {
        pending.push_back(request);
    }
}
