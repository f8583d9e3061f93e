//! Worker supervisor: lifecycle of the background loops that drive things.
//!
//! A worker repeatedly runs a [`LoopBody`] until its cancellation token
//! fires. Where it runs depends on its [`Isolation`]:
//!
//! | Isolation   | Runs on                                   | Join timeout escalation |
//! |-------------|-------------------------------------------|-------------------------|
//! | `shared`    | a task on the ambient tokio runtime       | task is aborted         |
//! | `dedicated` | its own OS thread with a private runtime  | thread is abandoned     |
//!
//! Stopping never interrupts a step that is in progress; the body observes
//! the token at its own suspension points.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use apparatus_domain::id::WorkerId;

use crate::error::WorkerError;

/// One iteration of a worker loop.
///
/// `step` must reach an `.await` that yields when there is nothing to do,
/// otherwise the loop never gives the token a chance to be observed.
pub trait LoopBody: Send + 'static {
    fn step(&mut self, cancel: &CancellationToken) -> impl Future<Output = ()> + Send;
}

/// Where a worker runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Isolation {
    /// A task on the shared tokio runtime.
    #[default]
    Shared,
    /// A dedicated OS thread with its own current-thread runtime, for drivers
    /// that block.
    Dedicated,
}

impl Isolation {
    /// What a join that misses its deadline does to a worker of this kind.
    #[must_use]
    pub fn escalation(self) -> JoinOutcome {
        match self {
            Self::Shared => JoinOutcome::Aborted,
            Self::Dedicated => JoinOutcome::Abandoned,
        }
    }
}

/// Lifecycle of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Created,
    Running,
    StopRequested,
    Stopped,
}

impl WorkerState {
    /// Whether the worker may still take commands.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Created | Self::Running)
    }
}

/// How `join` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The loop exited on its own.
    Joined,
    /// A shared worker overran the timeout and its task was aborted.
    Aborted,
    /// A dedicated worker overran the timeout; its thread was left behind.
    Abandoned,
}

enum Handle {
    Task(tokio::task::JoinHandle<()>),
    Thread(std::thread::JoinHandle<()>),
}

/// Marks the worker stopped however its loop ends (return, abort, panic).
struct StoppedOnDrop(Arc<watch::Sender<WorkerState>>);

impl Drop for StoppedOnDrop {
    fn drop(&mut self) {
        self.0.send_if_modified(|state| {
            let changed = *state != WorkerState::Stopped;
            *state = WorkerState::Stopped;
            changed
        });
    }
}

async fn drive<B: LoopBody>(
    mut body: B,
    name: String,
    cancel: CancellationToken,
    state: Arc<watch::Sender<WorkerState>>,
    stopped: StoppedOnDrop,
) {
    let _stopped = stopped;
    let started = state.send_if_modified(|current| {
        if *current == WorkerState::Created {
            *current = WorkerState::Running;
            true
        } else {
            false
        }
    });
    if !started {
        return;
    }
    tracing::info!(worker = %name, "worker running");
    while !cancel.is_cancelled() {
        body.step(&cancel).await;
    }
    tracing::info!(worker = %name, "worker finished");
}

/// A running (or finished) background loop.
pub struct Worker {
    id: WorkerId,
    name: String,
    isolation: Isolation,
    cancel: CancellationToken,
    state: Arc<watch::Sender<WorkerState>>,
    handle: Option<Handle>,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("isolation", &self.isolation)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl Worker {
    /// Start running `body` in a loop.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::NoRuntime`] for a shared worker spawned outside
    /// a tokio runtime and [`WorkerError::Spawn`] when the OS refuses a
    /// dedicated thread.
    pub fn spawn<B: LoopBody>(
        name: impl Into<String>,
        isolation: Isolation,
        body: B,
    ) -> Result<Self, WorkerError> {
        let name = name.into();
        let cancel = CancellationToken::new();
        let (state, _) = watch::channel(WorkerState::Created);
        let state = Arc::new(state);
        let stopped = StoppedOnDrop(Arc::clone(&state));
        let run = drive(body, name.clone(), cancel.clone(), Arc::clone(&state), stopped);

        let handle = match isolation {
            Isolation::Shared => {
                let runtime =
                    tokio::runtime::Handle::try_current().map_err(|_| WorkerError::NoRuntime)?;
                Handle::Task(runtime.spawn(run))
            }
            Isolation::Dedicated => {
                let thread_name = format!("worker-{name}");
                let worker = name.clone();
                let thread = std::thread::Builder::new()
                    .name(thread_name)
                    .spawn(move || {
                        match tokio::runtime::Builder::new_current_thread()
                            .enable_all()
                            .build()
                        {
                            Ok(runtime) => runtime.block_on(run),
                            Err(err) => {
                                tracing::error!(worker = %worker, error = %err, "failed to build worker runtime");
                            }
                        }
                    })
                    .map_err(WorkerError::Spawn)?;
                Handle::Thread(thread)
            }
        };

        tracing::debug!(worker = %name, ?isolation, "worker spawned");
        Ok(Self {
            id: WorkerId::new(),
            name,
            isolation,
            cancel,
            state,
            handle: Some(handle),
        })
    }

    #[must_use]
    pub fn id(&self) -> WorkerId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn isolation(&self) -> Isolation {
        self.isolation
    }

    #[must_use]
    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Ask the loop to finish. Idempotent and non-blocking.
    pub fn stop(&self) {
        let changed = self.state.send_if_modified(|state| match state {
            WorkerState::Running => {
                *state = WorkerState::StopRequested;
                true
            }
            WorkerState::Created => {
                *state = WorkerState::Stopped;
                true
            }
            WorkerState::StopRequested | WorkerState::Stopped => false,
        });
        if changed {
            tracing::debug!(worker = %self.name, "stop requested");
        }
        self.cancel.cancel();
    }

    /// Wait up to `timeout` for the loop to finish, then escalate.
    ///
    /// Call [`Worker::stop`] first, otherwise the loop keeps running until the
    /// timeout escalates.
    pub async fn join(&mut self, timeout: Duration) -> JoinOutcome {
        let handle = self.handle.take();
        finish(&self.name, self.isolation, &self.state, handle, timeout).await
    }
}

async fn finish(
    name: &str,
    isolation: Isolation,
    state: &watch::Sender<WorkerState>,
    handle: Option<Handle>,
    timeout: Duration,
) -> JoinOutcome {
    let mut rx = state.subscribe();
    let stopped = tokio::time::timeout(timeout, async move {
        rx.wait_for(|state| *state == WorkerState::Stopped)
            .await
            .is_ok()
    })
    .await
    .is_ok();

    match handle {
        None if stopped => JoinOutcome::Joined,
        // An earlier join already escalated and the loop is still stuck.
        None => isolation.escalation(),
        Some(Handle::Task(task)) if stopped => {
            if let Err(err) = task.await {
                if err.is_panic() {
                    tracing::warn!(worker = %name, "worker panicked");
                }
            }
            JoinOutcome::Joined
        }
        Some(Handle::Thread(thread)) if stopped => {
            let joined = tokio::task::spawn_blocking(move || thread.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                tracing::warn!(worker = %name, "worker thread panicked");
            }
            JoinOutcome::Joined
        }
        Some(Handle::Task(task)) => {
            tracing::warn!(worker = %name, ?timeout, "worker did not stop in time, aborting");
            task.abort();
            JoinOutcome::Aborted
        }
        Some(Handle::Thread(_)) => {
            tracing::warn!(worker = %name, ?timeout, "worker thread did not stop in time, abandoning");
            JoinOutcome::Abandoned
        }
    }
}

/// Registry of workers keyed by id.
#[derive(Debug, Default)]
pub struct Supervisor {
    workers: Mutex<HashMap<WorkerId, Worker>>,
}

impl Supervisor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn workers(&self) -> std::sync::MutexGuard<'_, HashMap<WorkerId, Worker>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a worker running `body`.
    ///
    /// # Errors
    ///
    /// See [`Worker::spawn`].
    pub fn spawn<B: LoopBody>(
        &self,
        name: impl Into<String>,
        isolation: Isolation,
        body: B,
    ) -> Result<WorkerId, WorkerError> {
        let worker = Worker::spawn(name, isolation, body)?;
        let id = worker.id();
        self.workers().insert(id, worker);
        Ok(id)
    }

    /// State of a worker, `None` if it is unknown.
    #[must_use]
    pub fn state(&self, id: WorkerId) -> Option<WorkerState> {
        self.workers().get(&id).map(Worker::state)
    }

    /// Request a worker to stop. Returns `false` if it is unknown.
    pub fn stop(&self, id: WorkerId) -> bool {
        self.workers().get(&id).map(Worker::stop).is_some()
    }

    pub fn stop_all(&self) {
        for worker in self.workers().values() {
            worker.stop();
        }
    }

    /// Wait for a stopped worker. The worker stays registered so its final
    /// state can still be queried.
    pub async fn join(&self, id: WorkerId, timeout: Duration) -> Option<JoinOutcome> {
        let (name, isolation, state, handle) = {
            let mut workers = self.workers();
            let worker = workers.get_mut(&id)?;
            (
                worker.name.clone(),
                worker.isolation,
                Arc::clone(&worker.state),
                worker.handle.take(),
            )
        };
        Some(finish(&name, isolation, &state, handle, timeout).await)
    }

    /// Stop and drop a worker.
    pub fn forget(&self, id: WorkerId) -> bool {
        let removed = self.workers().remove(&id);
        removed.inspect(Worker::stop).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.workers().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers().is_empty()
    }

    /// Stop every worker, then join them all against one deadline.
    pub async fn shutdown(&self, timeout: Duration) -> Vec<(String, JoinOutcome)> {
        self.stop_all();
        let deadline = Instant::now() + timeout;
        let pending: Vec<_> = self
            .workers()
            .values_mut()
            .map(|worker| {
                (
                    worker.name.clone(),
                    worker.isolation,
                    Arc::clone(&worker.state),
                    worker.handle.take(),
                )
            })
            .collect();

        let mut outcomes = Vec::with_capacity(pending.len());
        for (name, isolation, state, handle) in pending {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let outcome = finish(&name, isolation, &state, handle, remaining).await;
            outcomes.push((name, outcome));
        }
        tracing::info!(workers = outcomes.len(), "supervisor shut down");
        outcomes
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        for worker in self
            .workers
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
        {
            worker.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Ticker {
        ticks: Arc<AtomicUsize>,
    }

    impl LoopBody for Ticker {
        async fn step(&mut self, cancel: &CancellationToken) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(Duration::from_millis(5)) => {}
            }
        }
    }

    /// Ignores the token while busy, like a driver stuck in a blocking call.
    struct Stubborn;

    impl LoopBody for Stubborn {
        async fn step(&mut self, _cancel: &CancellationToken) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
    }

    fn ticker() -> (Ticker, Arc<AtomicUsize>) {
        let ticks = Arc::new(AtomicUsize::new(0));
        (
            Ticker {
                ticks: Arc::clone(&ticks),
            },
            ticks,
        )
    }

    async fn wait_until_running(supervisor: &Supervisor, id: WorkerId) {
        for _ in 0..200 {
            if supervisor.state(id) == Some(WorkerState::Running) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("worker never started");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn should_run_body_until_stopped_when_shared() {
        let supervisor = Supervisor::new();
        let (body, ticks) = ticker();
        let id = supervisor.spawn("ticker", Isolation::Shared, body).unwrap();
        wait_until_running(&supervisor, id).await;

        supervisor.stop(id);
        let outcome = supervisor.join(id, Duration::from_secs(2)).await;

        assert_eq!(outcome, Some(JoinOutcome::Joined));
        assert_eq!(supervisor.state(id), Some(WorkerState::Stopped));
        assert!(ticks.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn should_treat_double_stop_as_no_op_and_stop_within_two_seconds() {
        let supervisor = Supervisor::new();
        let (body, _) = ticker();
        let id = supervisor.spawn("ticker", Isolation::Dedicated, body).unwrap();
        wait_until_running(&supervisor, id).await;

        assert!(supervisor.stop(id));
        assert!(supervisor.stop(id));
        let outcome = supervisor.join(id, Duration::from_secs(2)).await;

        assert_eq!(outcome, Some(JoinOutcome::Joined));
        assert_eq!(supervisor.state(id), Some(WorkerState::Stopped));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn should_run_dedicated_worker_on_named_thread() {
        struct ThreadName(Arc<Mutex<Option<String>>>);
        impl LoopBody for ThreadName {
            async fn step(&mut self, cancel: &CancellationToken) {
                *self.0.lock().unwrap() = std::thread::current().name().map(str::to_string);
                cancel.cancelled().await;
            }
        }

        let seen = Arc::new(Mutex::new(None));
        let supervisor = Supervisor::new();
        let id = supervisor
            .spawn("MEMS", Isolation::Dedicated, ThreadName(Arc::clone(&seen)))
            .unwrap();
        wait_until_running(&supervisor, id).await;
        supervisor.stop(id);
        supervisor.join(id, Duration::from_secs(2)).await;

        assert_eq!(seen.lock().unwrap().as_deref(), Some("worker-MEMS"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn should_abort_shared_worker_when_join_times_out() {
        let supervisor = Supervisor::new();
        let id = supervisor.spawn("stubborn", Isolation::Shared, Stubborn).unwrap();
        wait_until_running(&supervisor, id).await;

        supervisor.stop(id);
        assert_eq!(supervisor.state(id), Some(WorkerState::StopRequested));
        let outcome = supervisor.join(id, Duration::from_millis(50)).await;

        assert_eq!(outcome, Some(JoinOutcome::Aborted));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn should_abandon_dedicated_worker_when_join_times_out() {
        let supervisor = Supervisor::new();
        let id = supervisor
            .spawn("stubborn", Isolation::Dedicated, Stubborn)
            .unwrap();
        wait_until_running(&supervisor, id).await;

        supervisor.stop(id);
        let outcome = supervisor.join(id, Duration::from_millis(50)).await;

        assert_eq!(outcome, Some(JoinOutcome::Abandoned));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn should_report_escalation_again_when_joined_twice() {
        let supervisor = Supervisor::new();
        let id = supervisor
            .spawn("stubborn", Isolation::Dedicated, Stubborn)
            .unwrap();
        wait_until_running(&supervisor, id).await;
        supervisor.stop(id);
        supervisor.join(id, Duration::from_millis(50)).await;

        let again = supervisor.join(id, Duration::from_millis(50)).await;

        assert_eq!(again, Some(JoinOutcome::Abandoned));
        assert_eq!(supervisor.state(id), Some(WorkerState::StopRequested));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn should_report_joined_when_stopped_worker_is_joined_twice() {
        let supervisor = Supervisor::new();
        let (body, _) = ticker();
        let id = supervisor.spawn("ticker", Isolation::Shared, body).unwrap();
        wait_until_running(&supervisor, id).await;
        supervisor.stop(id);
        supervisor.join(id, Duration::from_secs(2)).await;

        let again = supervisor.join(id, Duration::from_secs(2)).await;

        assert_eq!(again, Some(JoinOutcome::Joined));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn should_join_all_workers_on_shutdown() {
        let supervisor = Supervisor::new();
        for name in ["X", "Y", "Z"] {
            let (body, _) = ticker();
            supervisor.spawn(name, Isolation::Shared, body).unwrap();
        }

        let outcomes = supervisor.shutdown(Duration::from_secs(2)).await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|(_, outcome)| *outcome == JoinOutcome::Joined));
    }

    #[test]
    fn should_refuse_shared_worker_outside_runtime() {
        let (body, _) = ticker();
        let result = Worker::spawn("ticker", Isolation::Shared, body);
        assert!(matches!(result, Err(WorkerError::NoRuntime)));
    }

    #[test]
    fn should_deserialize_isolation_from_snake_case() {
        #[derive(Deserialize)]
        struct Wrapper {
            isolation: Isolation,
        }
        let parsed: Wrapper = serde_json::from_str(r#"{"isolation":"dedicated"}"#).unwrap();
        assert_eq!(parsed.isolation, Isolation::Dedicated);
    }
}
