//! Command queue: ordered delivery of commands to one thing.
//!
//! Every thing has its own bounded FIFO. Any number of producers may add
//! messages; a single [`Consumer`] at a time may take them, and the
//! [`Dispatcher`] keeps holding it while the command runs, so a thing never
//! sees two commands in flight even when two workers were started for it.
//!
//! Delivery is at-most-once: a message that is taken is answered exactly
//! once, and messages still queued when the worker stops are answered with
//! [`ActuationError::Unavailable`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard, mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use apparatus_domain::id::MessageId;
use apparatus_domain::time::{Timestamp, now};

use crate::error::ActuationError;
use crate::ports::Ack;
use crate::state::StateCell;
use crate::thing::Thing;
use crate::worker::LoopBody;

/// What a worker should do with its thing.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Write `value` to `input`.
    Actuate { input: String, value: f64 },
    /// Read the device and refresh its inputs.
    Update,
    /// (Re)open the hardware handle.
    Connect,
}

/// Successful result of a [`Command`].
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Actuated(Ack),
    Updated(Vec<(String, f64)>),
    Connected,
}

impl Outcome {
    /// The acknowledgement of an `Actuate` command.
    #[must_use]
    pub fn ack(&self) -> Option<Ack> {
        match self {
            Self::Actuated(ack) => Some(*ack),
            Self::Updated(_) | Self::Connected => None,
        }
    }
}

/// Receiving half of a message's reply channel.
pub type ReplyReceiver = oneshot::Receiver<Result<Outcome, ActuationError>>;

/// A command addressed to one thing.
#[derive(Debug)]
pub struct Message {
    pub id: MessageId,
    pub thing: String,
    pub command: Command,
    pub enqueued_at: Timestamp,
    reply: Option<oneshot::Sender<Result<Outcome, ActuationError>>>,
}

impl Message {
    /// A fire-and-forget message; its result is only logged.
    #[must_use]
    pub fn new(thing: impl Into<String>, command: Command) -> Self {
        Self {
            id: MessageId::new(),
            thing: thing.into(),
            command,
            enqueued_at: now(),
            reply: None,
        }
    }

    /// A message whose result is delivered to the returned receiver.
    #[must_use]
    pub fn with_reply(thing: impl Into<String>, command: Command) -> (Self, ReplyReceiver) {
        let (tx, rx) = oneshot::channel();
        let mut message = Self::new(thing, command);
        message.reply = Some(tx);
        (message, rx)
    }

    /// Whether the caller stopped waiting for the reply. Fire-and-forget
    /// messages are never abandoned.
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.reply.as_ref().is_some_and(oneshot::Sender::is_closed)
    }

    /// Hand the result to whoever is waiting. A caller that already gave up
    /// is not an error.
    pub fn respond(self, result: Result<Outcome, ActuationError>) {
        if let Some(reply) = self.reply {
            let _ = reply.send(result);
        }
    }
}

/// Bounded FIFO of messages for one thing. Cloning yields another handle on
/// the same queue.
#[derive(Debug, Clone)]
pub struct CommandQueue {
    thing: Arc<str>,
    tx: mpsc::Sender<Message>,
    rx: Arc<Mutex<mpsc::Receiver<Message>>>,
}

impl CommandQueue {
    /// Create an empty queue holding at most `capacity` pending messages.
    #[must_use]
    pub fn new(thing: &str, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            thing: Arc::from(thing),
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Append `message` at the tail, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`ActuationError::QueueClosed`] once the queue was closed.
    pub async fn add(&self, message: Message) -> Result<(), ActuationError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| ActuationError::QueueClosed {
                thing: self.thing.to_string(),
            })
    }

    /// Number of messages waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Become the queue's consumer, waiting for the current one to let go.
    pub async fn consumer(&self) -> Consumer {
        Consumer {
            rx: Arc::clone(&self.rx).lock_owned().await,
        }
    }

    /// Answer every pending message with `Unavailable`. Returns how many were
    /// dropped.
    pub async fn drain(&self) -> usize {
        let mut consumer = self.consumer().await;
        let mut drained = 0;
        while let Ok(message) = consumer.rx.try_recv() {
            tracing::debug!(thing = %self.thing, message_id = %message.id, "dropping pending command");
            message.respond(Err(ActuationError::Unavailable {
                thing: self.thing.to_string(),
            }));
            drained += 1;
        }
        drained
    }

    /// Refuse new messages and drain the pending ones.
    pub async fn close(&self) -> usize {
        self.consumer().await.rx.close();
        self.drain().await
    }
}

/// Exclusive right to take messages from a [`CommandQueue`].
#[derive(Debug)]
pub struct Consumer {
    rx: OwnedMutexGuard<mpsc::Receiver<Message>>,
}

impl Consumer {
    /// Take the oldest message, waiting at most `timeout` for one to arrive.
    ///
    /// Returns `None` on timeout, when `cancel` fires, or when the queue is
    /// closed and empty.
    pub async fn next(&mut self, timeout: Duration, cancel: &CancellationToken) -> Option<Message> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            received = tokio::time::timeout(timeout, self.rx.recv()) => received.ok().flatten(),
        }
    }
}

/// Worker loop body: takes commands for one thing, applies them, commits
/// successful results to the hub snapshot and polls when idle.
pub struct Dispatcher {
    queue: CommandQueue,
    thing: Arc<Mutex<Thing>>,
    name: String,
    state: StateCell,
    poll_interval: Option<Duration>,
    idle_timeout: Duration,
    next_poll: Option<Instant>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        queue: CommandQueue,
        thing: Arc<Mutex<Thing>>,
        state: StateCell,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            thing,
            name: name.into(),
            state,
            poll_interval: None,
            idle_timeout,
            next_poll: None,
        }
    }

    /// Refresh the thing's inputs every `interval` while the queue is idle.
    #[must_use]
    pub fn polling(mut self, interval: Option<Duration>) -> Self {
        self.poll_interval = interval;
        self.next_poll = interval.map(|_| Instant::now());
        self
    }

    fn idle_wait(&self) -> Duration {
        match self.next_poll {
            Some(at) => self
                .idle_timeout
                .min(at.saturating_duration_since(Instant::now())),
            None => self.idle_timeout,
        }
    }

    /// Apply one message and answer it.
    async fn dispatch(&self, message: Message, cancel: &CancellationToken) {
        if message.is_abandoned() {
            tracing::debug!(thing = %self.name, message_id = %message.id, command = ?message.command, "skipping abandoned command");
            return;
        }
        tracing::debug!(thing = %self.name, message_id = %message.id, command = ?message.command, "dispatching");
        let result = self.apply(&message.command, cancel).await;
        match &result {
            Ok(_) => tracing::debug!(thing = %self.name, message_id = %message.id, "command applied"),
            Err(err) => tracing::warn!(
                thing = %self.name,
                message_id = %message.id,
                error = %err,
                "command failed"
            ),
        }
        message.respond(result);
    }

    async fn apply(
        &self,
        command: &Command,
        cancel: &CancellationToken,
    ) -> Result<Outcome, ActuationError> {
        let mut thing = self.thing.lock().await;
        match command {
            Command::Actuate { input, value } => {
                let ack = thing
                    .actuate(input, *value, cancel)
                    .await
                    .map_err(|source| self.device_error(source))?;
                self.state
                    .commit(|snapshot| snapshot.set(&self.name, input, ack.value));
                Ok(Outcome::Actuated(ack))
            }
            Command::Update => {
                let applied = thing
                    .update(cancel)
                    .await
                    .map_err(|source| self.device_error(source))?;
                if !applied.is_empty() {
                    self.state.commit(|snapshot| {
                        for (input, value) in &applied {
                            snapshot.set(&self.name, input, *value);
                        }
                    });
                }
                Ok(Outcome::Updated(applied))
            }
            Command::Connect => {
                thing
                    .connect(cancel)
                    .await
                    .map_err(|source| ActuationError::Connection {
                        thing: self.name.clone(),
                        source,
                    })?;
                Ok(Outcome::Connected)
            }
        }
    }

    fn device_error(&self, source: crate::error::DeviceError) -> ActuationError {
        ActuationError::Device {
            thing: self.name.clone(),
            source,
        }
    }

    async fn poll(&mut self, cancel: &CancellationToken) {
        let Some(interval) = self.poll_interval else {
            return;
        };
        if self.next_poll.is_some_and(|at| at > Instant::now()) {
            return;
        }
        match self.apply(&Command::Update, cancel).await {
            Ok(_) => {}
            Err(ActuationError::Device {
                source: crate::error::DeviceError::Disconnected,
                ..
            }) => tracing::debug!(thing = %self.name, "skipping poll while disconnected"),
            Err(err) => tracing::warn!(thing = %self.name, error = %err, "poll failed"),
        }
        self.next_poll = Some(Instant::now() + interval);
    }
}

impl LoopBody for Dispatcher {
    async fn step(&mut self, cancel: &CancellationToken) {
        let mut consumer = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            consumer = self.queue.consumer() => consumer,
        };
        match consumer.next(self.idle_wait(), cancel).await {
            Some(message) => self.dispatch(message, cancel).await,
            None if !cancel.is_cancelled() => self.poll(cancel).await,
            None => {}
        }
        drop(consumer);
    }
}
