//! Hub: root of the control graph and the entry point for callers.
//!
//! The hub owns the node registry, one [`Thing`] and [`CommandQueue`] per
//! device, the worker supervisor and the published [`Snapshot`]. Every state
//! change requested from outside goes through [`Hub::actuate`] (or one of its
//! batch / maintenance variants), which enqueues a command for the thing's
//! worker and waits for its reply.
//!
//! Locking order: a thing's `tokio::sync::Mutex` is always taken before the
//! tree lock, and the tree lock is never held across an `.await`.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use apparatus_domain::error::NotFoundError;
use apparatus_domain::id::{NodeId, WorkerId};
use apparatus_domain::input::InputSpec;
use apparatus_domain::path::NodePath;
use apparatus_domain::registry::{NodeKind, NodeRegistry};
use apparatus_domain::snapshot::{SavedState, Snapshot};

use crate::config::HubConfig;
use crate::error::{ActuationError, PersistenceError, StructureError};
use crate::ports::{Ack, DeviceDriver, SnapshotStore};
use crate::queue::{Command, CommandQueue, Dispatcher, Message, Outcome, ReplyReceiver};
use crate::state::StateCell;
use crate::thing::{InputHandle, Thing};
use crate::worker::{Isolation, JoinOutcome, Supervisor, WorkerState};

/// How a thing is attached: where its worker runs, whether it polls, and the
/// inputs it starts with.
#[derive(Debug, Clone, Default)]
pub struct ThingOptions {
    pub isolation: Isolation,
    pub poll_interval: Option<Duration>,
    pub inputs: Vec<(String, InputSpec)>,
}

impl ThingOptions {
    #[must_use]
    pub fn with_input(mut self, name: impl Into<String>, spec: InputSpec) -> Self {
        self.inputs.push((name.into(), spec));
        self
    }

    #[must_use]
    pub fn isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    #[must_use]
    pub fn polling(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }
}

/// What `load` did with a stored state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Number of input values applied.
    pub restored: usize,
    /// Paths present in the store that this hub does not know (or whose value
    /// it rejected).
    pub skipped: Vec<String>,
}

struct ThingSlot {
    node: NodeId,
    thing: Arc<Mutex<Thing>>,
    queue: CommandQueue,
    specs: BTreeMap<String, InputSpec>,
    isolation: Isolation,
    poll_interval: Option<Duration>,
    worker: Option<WorkerId>,
}

struct Tree {
    registry: NodeRegistry,
    things: BTreeMap<String, ThingSlot>,
}

/// A command resolved to its queue.
struct Target {
    path: NodePath,
    queue: CommandQueue,
}

/// Root of the apparatus.
pub struct Hub {
    name: String,
    config: HubConfig,
    tree: RwLock<Tree>,
    state: StateCell,
    supervisor: Supervisor,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("things", &self.things())
            .finish_non_exhaustive()
    }
}

impl Hub {
    /// Create an empty hub.
    ///
    /// # Errors
    ///
    /// Returns [`StructureError::Registry`] if `name` is not a valid node name.
    pub fn new(name: impl Into<String>, config: HubConfig) -> Result<Self, StructureError> {
        let name = name.into();
        let registry = NodeRegistry::new(name.clone())?;
        tracing::info!(hub = %name, "hub created");
        Ok(Self {
            state: StateCell::new(Snapshot::new(name.clone())),
            name,
            config,
            tree: RwLock::new(Tree {
                registry,
                things: BTreeMap::new(),
            }),
            supervisor: Supervisor::new(),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    fn read_tree(&self) -> RwLockReadGuard<'_, Tree> {
        self.tree.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_tree(&self) -> RwLockWriteGuard<'_, Tree> {
        self.tree.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn thing_not_found(name: &str) -> NotFoundError {
        NotFoundError {
            kind: "thing",
            path: name.to_string(),
        }
    }

    // -- structure ---------------------------------------------------------

    /// Attach a device under the hub. Returns the name it was registered
    /// under (`X_1` when `X` already exists).
    ///
    /// # Errors
    ///
    /// Returns [`StructureError::Validation`] for an invalid input spec and
    /// [`StructureError::Registry`] for an invalid name. Nothing is attached
    /// in either case.
    #[tracing::instrument(skip(self, driver, options), fields(hub = %self.name, driver = driver.kind()))]
    pub fn attach_thing(
        &self,
        name: &str,
        driver: Box<dyn DeviceDriver>,
        options: ThingOptions,
    ) -> Result<String, StructureError> {
        for (_, spec) in &options.inputs {
            spec.validate()?;
        }

        let mut tree = self.write_tree();
        let root = tree.registry.root();
        let (node, unique) = tree.registry.register(root, name, NodeKind::Thing)?;
        let mut thing = Thing::new(unique.clone(), node, driver, self.config.io_timeout);
        let mut specs = BTreeMap::new();
        for (input, spec) in &options.inputs {
            let kind = NodeKind::Input {
                access: spec.access,
            };
            match tree.registry.register(node, input, kind) {
                Ok((id, input)) => {
                    thing.add_input(input.clone(), id, *spec);
                    specs.insert(input, *spec);
                }
                Err(err) => {
                    let _ = tree.registry.remove(node);
                    return Err(err.into());
                }
            }
        }

        let values = thing.values();
        tree.things.insert(
            unique.clone(),
            ThingSlot {
                node,
                thing: Arc::new(Mutex::new(thing)),
                queue: CommandQueue::new(&unique, self.config.queue_capacity),
                specs,
                isolation: options.isolation,
                poll_interval: options.poll_interval,
                worker: None,
            },
        );
        drop(tree);

        self.state.commit(|snapshot| {
            snapshot.insert_thing(&unique);
            for (input, value) in &values {
                snapshot.set(&unique, input, *value);
            }
        });
        tracing::info!(thing = %unique, inputs = values.len(), "thing attached");
        Ok(unique)
    }

    /// Stop the thing's worker, answer its pending commands, disconnect it and
    /// remove it with its inputs.
    ///
    /// # Errors
    ///
    /// Returns [`StructureError::NotFound`] for an unknown thing.
    #[tracing::instrument(skip(self), fields(hub = %self.name))]
    pub async fn detach_thing(&self, name: &str) -> Result<(), StructureError> {
        let slot = {
            let mut tree = self.write_tree();
            let slot = tree
                .things
                .remove(name)
                .ok_or_else(|| Self::thing_not_found(name))?;
            tree.registry.remove(slot.node)?;
            slot
        };

        let mut outcome = None;
        if let Some(worker) = slot.worker {
            self.supervisor.stop(worker);
            outcome = self.supervisor.join(worker, self.config.join_timeout).await;
            self.supervisor.forget(worker);
        }
        self.release_queue(name, &slot.queue, outcome, true).await;
        self.disconnect_thing(name, &slot.thing, outcome).await;
        self.state.commit(|snapshot| snapshot.remove_thing(name));
        tracing::info!(thing = %name, "thing detached");
        Ok(())
    }

    /// Add an input to an attached thing.
    ///
    /// # Errors
    ///
    /// - [`StructureError::Validation`] for an invalid spec
    /// - [`StructureError::NotFound`] for an unknown thing
    /// - [`StructureError::Registry`] for an invalid name
    #[tracing::instrument(skip(self, spec), fields(hub = %self.name))]
    pub async fn add_input(
        &self,
        thing: &str,
        name: &str,
        spec: InputSpec,
    ) -> Result<InputHandle, StructureError> {
        spec.validate()?;
        let shared = self.thing_handle(thing)?;
        let mut device = shared.lock().await;

        let handle = {
            let mut tree = self.write_tree();
            let tree = &mut *tree;
            let slot = tree
                .things
                .get_mut(thing)
                .filter(|slot| Arc::ptr_eq(&slot.thing, &shared))
                .ok_or_else(|| Self::thing_not_found(thing))?;
            let kind = NodeKind::Input {
                access: spec.access,
            };
            let (id, unique) = tree.registry.register(slot.node, name, kind)?;
            slot.specs.insert(unique.clone(), spec);
            device.add_input(unique, id, spec)
        };
        drop(device);

        self.state
            .commit(|snapshot| snapshot.set(thing, &handle.name, spec.initial));
        tracing::info!(thing = %thing, input = %handle.name, "input added");
        Ok(handle)
    }

    /// Remove an input.
    ///
    /// # Errors
    ///
    /// - [`StructureError::ResourceBusy`] while a polling worker is running
    ///   on the thing
    /// - [`StructureError::NotFound`] for an unknown thing or input
    #[tracing::instrument(skip(self), fields(hub = %self.name))]
    pub async fn remove_input(&self, thing: &str, name: &str) -> Result<(), StructureError> {
        let shared = {
            let tree = self.read_tree();
            let slot = tree
                .things
                .get(thing)
                .ok_or_else(|| Self::thing_not_found(thing))?;
            if slot.poll_interval.is_some() && self.worker_busy(slot.worker) {
                return Err(StructureError::ResourceBusy {
                    thing: thing.to_string(),
                    input: name.to_string(),
                });
            }
            Arc::clone(&slot.thing)
        };
        let mut device = shared.lock().await;

        {
            let mut tree = self.write_tree();
            let tree = &mut *tree;
            let slot = tree
                .things
                .get_mut(thing)
                .filter(|slot| Arc::ptr_eq(&slot.thing, &shared))
                .ok_or_else(|| Self::thing_not_found(thing))?;
            let id = tree.registry.child(slot.node, name).ok_or_else(|| NotFoundError {
                kind: "input",
                path: NodePath::input(thing, name).to_string(),
            })?;
            tree.registry.remove(id)?;
            slot.specs.remove(name);
            device.remove_input(name);
        }
        drop(device);

        self.state
            .commit(|snapshot| snapshot.remove_input(thing, name));
        tracing::info!(thing = %thing, input = %name, "input removed");
        Ok(())
    }

    fn thing_handle(&self, thing: &str) -> Result<Arc<Mutex<Thing>>, NotFoundError> {
        self.read_tree()
            .things
            .get(thing)
            .map(|slot| Arc::clone(&slot.thing))
            .ok_or_else(|| Self::thing_not_found(thing))
    }

    /// Names of the attached things, in name order.
    #[must_use]
    pub fn things(&self) -> Vec<String> {
        self.read_tree().things.keys().cloned().collect()
    }

    /// Inputs of a thing with their specs, in name order.
    #[must_use]
    pub fn inputs(&self, thing: &str) -> Option<Vec<(String, InputSpec)>> {
        self.read_tree().things.get(thing).map(|slot| {
            slot.specs
                .iter()
                .map(|(name, spec)| (name.clone(), *spec))
                .collect()
        })
    }

    // -- workers -----------------------------------------------------------

    fn worker_busy(&self, worker: Option<WorkerId>) -> bool {
        worker
            .and_then(|id| self.supervisor.state(id))
            .is_some_and(|state| state != WorkerState::Stopped)
    }

    fn worker_active(&self, worker: Option<WorkerId>) -> bool {
        worker
            .and_then(|id| self.supervisor.state(id))
            .is_some_and(WorkerState::is_active)
    }

    /// State of the thing's current worker, `None` if it never had one.
    #[must_use]
    pub fn worker_state(&self, thing: &str) -> Option<WorkerState> {
        let worker = self.read_tree().things.get(thing)?.worker?;
        self.supervisor.state(worker)
    }

    /// Start the worker of one thing. Its first command connects the device.
    ///
    /// # Errors
    ///
    /// - [`StructureError::NotFound`] for an unknown thing
    /// - [`StructureError::AlreadyRunning`] when a worker is still active
    /// - [`StructureError::Worker`] when the worker cannot be spawned
    #[tracing::instrument(skip(self), fields(hub = %self.name))]
    pub async fn start_worker(&self, thing: &str) -> Result<WorkerId, StructureError> {
        let queue = {
            let tree = self.read_tree();
            let slot = tree
                .things
                .get(thing)
                .ok_or_else(|| Self::thing_not_found(thing))?;
            if self.worker_busy(slot.worker) {
                return Err(StructureError::AlreadyRunning {
                    thing: thing.to_string(),
                });
            }
            slot.queue.clone()
        };
        queue
            .add(Message::new(thing, Command::Connect))
            .await
            .map_err(|_| Self::thing_not_found(thing))?;

        let mut tree = self.write_tree();
        let slot = tree
            .things
            .get_mut(thing)
            .ok_or_else(|| Self::thing_not_found(thing))?;
        if self.worker_busy(slot.worker) {
            return Err(StructureError::AlreadyRunning {
                thing: thing.to_string(),
            });
        }
        let body = Dispatcher::new(
            thing,
            slot.queue.clone(),
            Arc::clone(&slot.thing),
            self.state.clone(),
            self.config.idle_timeout,
        )
        .polling(slot.poll_interval);
        let id = self.supervisor.spawn(thing, slot.isolation, body)?;
        if let Some(previous) = slot.worker.replace(id) {
            self.supervisor.forget(previous);
        }
        tracing::info!(thing = %thing, worker = %id, isolation = ?slot.isolation, "worker started");
        Ok(id)
    }

    /// Start the workers of every thing that has none running.
    ///
    /// # Errors
    ///
    /// Returns the first spawn failure.
    pub async fn start_all(&self) -> Result<Vec<WorkerId>, StructureError> {
        let mut started = Vec::new();
        for thing in self.things() {
            match self.start_worker(&thing).await {
                Ok(id) => started.push(id),
                Err(StructureError::AlreadyRunning { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(started)
    }

    /// Stop the worker of one thing, wait for it and answer the commands it
    /// left behind with `Unavailable`.
    ///
    /// Returns `None` when the thing has no worker.
    ///
    /// # Errors
    ///
    /// Returns [`StructureError::NotFound`] for an unknown thing.
    #[tracing::instrument(skip(self), fields(hub = %self.name))]
    pub async fn stop_worker(&self, thing: &str) -> Result<Option<JoinOutcome>, StructureError> {
        let (worker, queue) = {
            let tree = self.read_tree();
            let slot = tree
                .things
                .get(thing)
                .ok_or_else(|| Self::thing_not_found(thing))?;
            (slot.worker, slot.queue.clone())
        };
        let Some(worker) = worker else {
            return Ok(None);
        };
        self.supervisor.stop(worker);
        let outcome = self
            .supervisor
            .join(worker, self.config.join_timeout)
            .await;
        let dropped = self.release_queue(thing, &queue, outcome, false).await;
        tracing::info!(thing = %thing, ?outcome, dropped, "worker stopped");
        Ok(outcome)
    }

    // -- commands ----------------------------------------------------------

    /// Resolve `path` to a writable input of a thing with an active worker.
    fn resolve_target(&self, path: &str, value: f64) -> Result<Target, ActuationError> {
        let requested: NodePath = path.parse()?;
        let tree = self.read_tree();

        let node = match tree.registry.resolve(&requested) {
            Ok(node) => node,
            Err(err) if requested.input_name().is_none() => tree
                .registry
                .find_unique_input(requested.thing_name())
                .ok_or(err)?,
            Err(err) => return Err(err.into()),
        };
        let resolved = tree.registry.path_of(node).ok_or_else(|| NotFoundError {
            kind: "node",
            path: path.to_string(),
        })?;
        let slot = tree
            .things
            .get(resolved.thing_name())
            .ok_or_else(|| Self::thing_not_found(resolved.thing_name()))?;

        let input = match resolved.input_name() {
            Some(input) => input.to_string(),
            None => tree
                .registry
                .get(slot.node)
                .and_then(|entry| {
                    entry
                        .children()
                        .iter()
                        .filter(|(_, id)| {
                            tree.registry.get(**id).is_some_and(|child| {
                                matches!(child.kind, NodeKind::Input { access } if access.is_writable())
                            })
                        })
                        .min_by_key(|(_, id)| **id)
                        .map(|(name, _)| name.clone())
                })
                .ok_or_else(|| ActuationError::NotActuatable {
                    path: resolved.to_string(),
                })?,
        };
        let full = NodePath::input(resolved.thing_name(), input.clone());

        let spec = slot
            .specs
            .get(&input)
            .ok_or_else(|| NotFoundError {
                kind: "input",
                path: full.to_string(),
            })?;
        if !spec.access.is_writable() {
            return Err(ActuationError::NotActuatable {
                path: full.to_string(),
            });
        }
        if !spec.admits(value) {
            return Err(ActuationError::OutOfRange {
                path: full.to_string(),
                value,
            });
        }
        if !self.worker_active(slot.worker) {
            return Err(ActuationError::Unavailable {
                thing: resolved.thing_name().to_string(),
            });
        }
        Ok(Target {
            path: full,
            queue: slot.queue.clone(),
        })
    }

    fn message_for(target: &Target, value: f64) -> (Message, ReplyReceiver) {
        Message::with_reply(
            target.path.thing_name(),
            Command::Actuate {
                input: target.path.input_name().unwrap_or_default().to_string(),
                value,
            },
        )
    }

    async fn await_reply(
        thing: &str,
        reply: ReplyReceiver,
    ) -> Result<Outcome, ActuationError> {
        reply.await.map_err(|_| ActuationError::Unavailable {
            thing: thing.to_string(),
        })?
    }

    /// Set the input addressed by `path` to `value` and wait for the device
    /// to confirm.
    ///
    /// `path` is `thing.input`, a bare thing (its primary input), or a bare
    /// input name that is unique in the hub. On success exactly that input
    /// changes in the snapshot.
    ///
    /// # Errors
    ///
    /// - [`ActuationError::InvalidPath`] / [`ActuationError::NotFound`]
    /// - [`ActuationError::NotActuatable`] for read-only targets
    /// - [`ActuationError::OutOfRange`] for non-finite or out-of-bounds values
    /// - [`ActuationError::Unavailable`] when the thing has no running worker
    /// - [`ActuationError::Device`] when the hardware reports a failure
    /// - [`ActuationError::Timeout`] after `actuate_timeout`
    #[tracing::instrument(skip(self), fields(hub = %self.name))]
    pub async fn actuate(&self, path: &str, value: f64) -> Result<Ack, ActuationError> {
        let target = self.resolve_target(path, value)?;
        let (message, reply) = Self::message_for(&target, value);
        let thing = target.path.thing_name().to_string();
        let after = self.config.actuate_timeout;

        let outcome = tokio::time::timeout(after, async {
            target.queue.add(message).await?;
            Self::await_reply(&thing, reply).await
        })
        .await
        .map_err(|_| ActuationError::Timeout {
            path: target.path.to_string(),
            after,
        })??;
        outcome.ack().ok_or(ActuationError::Unavailable { thing })
    }

    /// Actuate a whole `path → value` map.
    ///
    /// All commands are enqueued first, so different things move
    /// concurrently while commands for one thing keep the map's order. The
    /// whole batch shares one `actuate_timeout` deadline.
    #[tracing::instrument(skip(self, state), fields(hub = %self.name, paths = state.len()))]
    pub async fn actuate_many(
        &self,
        state: &BTreeMap<String, f64>,
    ) -> BTreeMap<String, Result<Ack, ActuationError>> {
        let after = self.config.actuate_timeout;
        let deadline = Instant::now() + after;
        let timed_out = |path: &str| ActuationError::Timeout {
            path: path.to_string(),
            after,
        };

        let mut results = BTreeMap::new();
        let mut pending = Vec::new();
        for (path, &value) in state {
            let target = match self.resolve_target(path, value) {
                Ok(target) => target,
                Err(err) => {
                    results.insert(path.clone(), Err(err));
                    continue;
                }
            };
            let (message, reply) = Self::message_for(&target, value);
            match tokio::time::timeout_at(deadline, target.queue.add(message)).await {
                Ok(Ok(())) => pending.push((path.clone(), target, reply)),
                Ok(Err(err)) => {
                    results.insert(path.clone(), Err(err));
                }
                Err(_) => {
                    results.insert(path.clone(), Err(timed_out(path)));
                }
            }
        }

        for (path, target, reply) in pending {
            let thing = target.path.thing_name();
            let result = match tokio::time::timeout_at(deadline, Self::await_reply(thing, reply)).await {
                Ok(Ok(outcome)) => outcome.ack().ok_or_else(|| ActuationError::Unavailable {
                    thing: thing.to_string(),
                }),
                Ok(Err(err)) => Err(err),
                Err(_) => Err(timed_out(&path)),
            };
            results.insert(path, result);
        }
        results
    }

    /// Send `command` to a thing's worker and wait for its outcome.
    async fn request(&self, thing: &str, command: Command) -> Result<Outcome, ActuationError> {
        let queue = {
            let tree = self.read_tree();
            let slot = tree
                .things
                .get(thing)
                .ok_or_else(|| Self::thing_not_found(thing))?;
            if !self.worker_active(slot.worker) {
                return Err(ActuationError::Unavailable {
                    thing: thing.to_string(),
                });
            }
            slot.queue.clone()
        };
        let (message, reply) = Message::with_reply(thing, command);
        let after = self.config.actuate_timeout;
        tokio::time::timeout(after, async {
            queue.add(message).await?;
            Self::await_reply(thing, reply).await
        })
        .await
        .map_err(|_| ActuationError::Timeout {
            path: thing.to_string(),
            after,
        })?
    }

    /// Reopen the hardware handle of a thing.
    ///
    /// # Errors
    ///
    /// Returns [`ActuationError::Connection`] when the device refuses, plus
    /// the queueing errors of [`Hub::actuate`].
    #[tracing::instrument(skip(self), fields(hub = %self.name))]
    pub async fn reconnect(&self, thing: &str) -> Result<(), ActuationError> {
        self.request(thing, Command::Connect).await.map(|_| ())
    }

    /// Read a thing now instead of waiting for its next poll. Returns the
    /// values that changed in the snapshot.
    ///
    /// # Errors
    ///
    /// Same as [`Hub::actuate`].
    #[tracing::instrument(skip(self), fields(hub = %self.name))]
    pub async fn refresh(&self, thing: &str) -> Result<Vec<(String, f64)>, ActuationError> {
        match self.request(thing, Command::Update).await? {
            Outcome::Updated(values) => Ok(values),
            Outcome::Actuated(_) | Outcome::Connected => Ok(Vec::new()),
        }
    }

    /// Drive every writable input to its value in the snapshot, so the
    /// hardware matches a freshly loaded state.
    #[tracing::instrument(skip(self), fields(hub = %self.name))]
    pub async fn sync_to_hardware(&self) -> BTreeMap<String, Result<Ack, ActuationError>> {
        let snapshot = self.read_state();
        let mut targets = BTreeMap::new();
        for (thing, slot) in &self.read_tree().things {
            for (input, spec) in &slot.specs {
                if !spec.access.is_writable() {
                    continue;
                }
                if let Some(value) = snapshot.get(thing, input) {
                    targets.insert(NodePath::input(thing, input).to_string(), value);
                }
            }
        }
        let results = self.actuate_many(&targets).await;
        let failed = results.values().filter(|result| result.is_err()).count();
        if failed > 0 {
            tracing::warn!(failed, total = results.len(), "hardware sync incomplete");
        } else {
            tracing::info!(total = results.len(), "hardware synced");
        }
        results
    }

    // -- state -------------------------------------------------------------

    /// The last committed snapshot. Never waits on a device.
    #[must_use]
    pub fn read_state(&self) -> Arc<Snapshot> {
        self.state.read()
    }

    /// Receiver notified on every committed change.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<Arc<Snapshot>> {
        self.state.subscribe()
    }

    /// Persist the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns the store's [`PersistenceError`].
    #[tracing::instrument(skip(self, store), fields(hub = %self.name, location = %store.location()))]
    pub async fn save<S: SnapshotStore + Sync>(&self, store: &S) -> Result<(), PersistenceError> {
        let saved = SavedState::from(&*self.read_state());
        store.save(&saved).await?;
        tracing::info!("state saved");
        Ok(())
    }

    /// Restore input values from `store`.
    ///
    /// Values for things or inputs this hub does not have are skipped with a
    /// warning, as are values outside an input's bounds. Inputs missing from
    /// the store keep their current value. An empty store restores nothing.
    ///
    /// # Errors
    ///
    /// Returns the store's [`PersistenceError`].
    #[tracing::instrument(skip(self, store), fields(hub = %self.name, location = %store.location()))]
    pub async fn load<S: SnapshotStore + Sync>(&self, store: &S) -> Result<LoadReport, PersistenceError> {
        let mut report = LoadReport::default();
        let Some(saved) = store.load().await? else {
            tracing::info!("no saved state");
            return Ok(report);
        };
        let Some(things) = saved.hub(&self.name) else {
            tracing::warn!("saved state has no entry for this hub");
            return Ok(report);
        };

        let handles: BTreeMap<String, (Arc<Mutex<Thing>>, BTreeMap<String, InputSpec>)> = self
            .read_tree()
            .things
            .iter()
            .map(|(name, slot)| (name.clone(), (Arc::clone(&slot.thing), slot.specs.clone())))
            .collect();

        let mut restored = Vec::new();
        for (thing, inputs) in things {
            let Some((shared, specs)) = handles.get(thing) else {
                tracing::warn!(thing = %thing, "skipping unknown thing");
                report
                    .skipped
                    .extend(inputs.keys().map(|input| NodePath::input(thing, input).to_string()));
                continue;
            };
            let mut device = shared.lock().await;
            for (input, &value) in inputs {
                let path = NodePath::input(thing, input).to_string();
                let admitted = specs.get(input).is_some_and(|spec| spec.admits(value));
                if admitted && device.set_value(input, value) {
                    restored.push((thing.clone(), input.clone(), value));
                } else {
                    tracing::warn!(path = %path, value, "skipping saved value");
                    report.skipped.push(path);
                }
            }
        }

        report.restored = restored.len();
        self.state.commit(|snapshot| {
            for (thing, input, value) in &restored {
                snapshot.set(thing, input, *value);
            }
        });
        tracing::info!(restored = report.restored, skipped = report.skipped.len(), "state loaded");
        Ok(report)
    }

    // -- lifecycle ---------------------------------------------------------

    /// Stop every worker against the shutdown deadline, answer pending
    /// commands and disconnect every device.
    #[tracing::instrument(skip(self), fields(hub = %self.name))]
    pub async fn shutdown(&self) -> Vec<(String, JoinOutcome)> {
        let outcomes = self.supervisor.shutdown(self.config.shutdown_timeout).await;

        let slots: Vec<_> = self
            .read_tree()
            .things
            .iter()
            .map(|(name, slot)| (name.clone(), slot.queue.clone(), Arc::clone(&slot.thing)))
            .collect();
        for (name, queue, thing) in slots {
            let outcome = outcomes
                .iter()
                .rev()
                .find(|(worker, _)| *worker == name)
                .map(|(_, outcome)| *outcome);
            self.release_queue(&name, &queue, outcome, false).await;
            self.disconnect_thing(&name, &thing, outcome).await;
        }
        tracing::info!(hub = %self.name, "hub shut down");
        outcomes
    }

    /// Answer the commands a stopped worker left behind with `Unavailable`,
    /// closing the queue first when `close` is set. Returns how many were
    /// answered.
    ///
    /// An abandoned worker still holds the queue while its device call runs,
    /// so its commands stay queued until the callers time out.
    async fn release_queue(
        &self,
        thing: &str,
        queue: &CommandQueue,
        outcome: Option<JoinOutcome>,
        close: bool,
    ) -> usize {
        if outcome == Some(JoinOutcome::Abandoned) {
            tracing::warn!(thing = %thing, "worker abandoned mid-command, pending commands left queued");
            return 0;
        }
        let released = if close {
            tokio::time::timeout(self.config.io_timeout, queue.close()).await
        } else {
            tokio::time::timeout(self.config.io_timeout, queue.drain()).await
        };
        released.unwrap_or_else(|_| {
            tracing::warn!(thing = %thing, "queue still held, pending commands left queued");
            0
        })
    }

    /// Release the hardware handle unless an abandoned worker still uses it.
    async fn disconnect_thing(
        &self,
        thing: &str,
        device: &Mutex<Thing>,
        outcome: Option<JoinOutcome>,
    ) {
        if outcome == Some(JoinOutcome::Abandoned) {
            tracing::warn!(thing = %thing, "worker abandoned mid-command, not disconnected");
            return;
        }
        match tokio::time::timeout(self.config.io_timeout, device.lock()).await {
            Ok(mut device) => {
                if tokio::time::timeout(self.config.io_timeout, device.disconnect())
                    .await
                    .is_err()
                {
                    tracing::warn!(thing = %thing, "disconnect timed out");
                }
            }
            Err(_) => tracing::warn!(thing = %thing, "thing still busy, not disconnected"),
        }
    }
}
