//! Message dispatcher: ordered delivery along resolved routes.
//!
//! Each actor gets one queue and one worker task. The worker takes messages
//! strictly in enqueue order and finishes one (delivered or failed) before
//! starting the next, so messages to the same actor arrive in program order
//! even when the route changes halfway through a sequence. Different actors
//! never wait on each other.
//!
//! A worker that stays idle for `idle_timeout` removes its own queue and
//! exits; the next message for that actor starts a fresh one. Enqueueing and
//! retiring both happen under the queue map's entry lock, so a worker only
//! retires with an empty queue that no sender can still reach.
//!
//! # Retry
//!
//! A delivery failing because the route is stale (destination unreachable or
//! no longer owner) drops the route, re-resolves, and tries again, up to
//! `max_retries` retries. Non-stale failures are reported immediately.
//!
//! # Orleans Reference
//!
//! Mirrors the per-activation message queue of Orleans' `ActivationData`
//! combined with the caller-side forwarding of `MessageCenter` on
//! `NonExistentActivation` rejections.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::ErrorKind;
use crate::runtime::envelope::MessageEnvelope;
use crate::runtime::router::{ActorRouter, RouterError};
use crate::runtime::transport::{Transport, TransportError};
use crate::types::{ActorId, Route};

/// Dispatcher tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Bound on one delivery round-trip.
    pub delivery_timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Queued messages per actor before [`MessageDispatcher::submit`] fails.
    pub queue_capacity: usize,
    /// Idle time after which a worker drops its queue and exits.
    pub idle_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            delivery_timeout: Duration::from_millis(5000),
            max_retries: 3,
            queue_capacity: 1024,
            idle_timeout: Duration::from_millis(60_000),
        }
    }
}

/// Successful delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Delivered on the route already in use.
    Delivered {
        /// Route used.
        route: Route,
    },
    /// Delivered on a different route than the one held before the send.
    Redirected {
        /// Route held before.
        from: Route,
        /// Route used.
        to: Route,
    },
}

impl SendOutcome {
    /// The route the message went out on.
    pub fn route(&self) -> &Route {
        match self {
            Self::Delivered { route } => route,
            Self::Redirected { to, .. } => to,
        }
    }
}

/// Errors from dispatching.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Resolution failed in a way retrying cannot fix.
    #[error("routing failed: {0}")]
    Routing(#[from] RouterError),

    /// The destination refused the message.
    #[error("delivery failed: {0}")]
    Transport(#[from] TransportError),

    /// Every attempt failed.
    #[error("delivery to {actor} failed after {attempts} attempts: {last_error}")]
    Failed {
        /// The actor.
        actor: ActorId,
        /// Attempts made.
        attempts: u32,
        /// Classification of the last failure.
        last_kind: ErrorKind,
        /// Description of the last failure.
        last_error: String,
    },

    /// The envelope names a different actor.
    #[error("envelope for {envelope_target} sent to {actor}")]
    Misaddressed {
        /// Actor passed to send.
        actor: ActorId,
        /// Actor named by the envelope.
        envelope_target: ActorId,
    },

    /// The actor's queue is full.
    #[error("queue for {actor} is full")]
    QueueFull {
        /// The actor.
        actor: ActorId,
    },

    /// The dispatcher shut down before the message was handled.
    #[error("dispatcher closed before {actor} message was handled")]
    Closed {
        /// The actor.
        actor: ActorId,
    },
}

impl DispatchError {
    /// Error classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Routing(err) => err.kind(),
            Self::Transport(err) => err.kind(),
            Self::Failed { last_kind, .. } => *last_kind,
            Self::Misaddressed { .. } | Self::QueueFull { .. } | Self::Closed { .. } => {
                ErrorKind::Other
            }
        }
    }
}

type Reply = oneshot::Sender<Result<SendOutcome, DispatchError>>;

#[derive(Debug)]
struct Job {
    envelope: MessageEnvelope,
    reply: Reply,
}

type Queues = DashMap<ActorId, mpsc::Sender<Job>>;

enum Enqueued {
    Accepted,
    Full(Job, mpsc::Sender<Job>),
}

/// Handle to a message accepted by [`MessageDispatcher::submit`].
#[derive(Debug)]
pub struct PendingDelivery {
    actor: ActorId,
    outcome: oneshot::Receiver<Result<SendOutcome, DispatchError>>,
}

impl PendingDelivery {
    /// Wait for the delivery outcome.
    pub async fn wait(self) -> Result<SendOutcome, DispatchError> {
        self.outcome
            .await
            .map_err(|_| DispatchError::Closed { actor: self.actor })?
    }
}

#[derive(Debug)]
struct Courier {
    router: Arc<ActorRouter>,
    transport: Arc<dyn Transport>,
    config: DispatchConfig,
}

impl Courier {
    async fn run_worker(
        self: Arc<Self>,
        actor: ActorId,
        mut jobs: mpsc::Receiver<Job>,
        me: mpsc::WeakSender<Job>,
        queues: Arc<Queues>,
        cancel: CancellationToken,
    ) {
        let mut current: Option<Route> = None;
        loop {
            let job = tokio::select! {
                _ = cancel.cancelled() => break,
                job = jobs.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
                _ = tokio::time::sleep(self.config.idle_timeout) => {
                    if retire(&queues, &actor, &me, &jobs) {
                        tracing::debug!(actor = %actor, idle = ?self.config.idle_timeout, "dispatch worker idle, retiring");
                        break;
                    }
                    continue;
                }
            };
            let outcome = self.deliver(&actor, &job.envelope, &mut current).await;
            if job.reply.send(outcome).is_err() {
                tracing::debug!(actor = %actor, "sender stopped waiting for delivery outcome");
            }
        }
        tracing::debug!(actor = %actor, "dispatch worker stopped");
    }

    async fn deliver(
        &self,
        actor: &ActorId,
        envelope: &MessageEnvelope,
        current: &mut Option<Route>,
    ) -> Result<SendOutcome, DispatchError> {
        let previous = current.clone();
        let attempts = self.config.max_retries + 1;
        let mut last_failure = (ErrorKind::Other, String::from("no attempt made"));

        for attempt in 1..=attempts {
            let route = match self.route(actor, current.as_ref()).await {
                Ok(route) => route,
                Err(err) if err.kind().is_retryable() || err.kind() == ErrorKind::Timeout => {
                    tracing::warn!(actor = %actor, attempt, error = %err, "resolution failed, retrying");
                    *current = None;
                    last_failure = (err.kind(), err.to_string());
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            let sent = tokio::time::timeout(
                self.config.delivery_timeout,
                self.transport.deliver(&route, envelope),
            )
            .await;
            match sent {
                Ok(Ok(())) => {
                    *current = Some(route.clone());
                    return Ok(match previous {
                        Some(from) if !same_path(&from, &route) => {
                            SendOutcome::Redirected { from, to: route }
                        }
                        _ => SendOutcome::Delivered { route },
                    });
                }
                Ok(Err(err)) if err.is_stale_route() => {
                    tracing::warn!(actor = %actor, attempt, route = %route, error = %err, "delivery on stale route, re-resolving");
                    last_failure = (err.kind(), err.to_string());
                }
                Ok(Err(err)) => return Err(err.into()),
                Err(_) => {
                    tracing::warn!(actor = %actor, attempt, route = %route, timeout = ?self.config.delivery_timeout, "delivery timed out");
                    last_failure = (
                        ErrorKind::Timeout,
                        format!("delivery timed out after {:?}", self.config.delivery_timeout),
                    );
                }
            }
            self.router.invalidate(actor, &route);
            *current = None;
        }

        let (last_kind, last_error) = last_failure;
        Err(DispatchError::Failed {
            actor: actor.clone(),
            attempts,
            last_kind,
            last_error,
        })
    }

    async fn route(&self, actor: &ActorId, held: Option<&Route>) -> Result<Route, RouterError> {
        match self.router.resolve(actor, held).await {
            Err(RouterError::StaleRoute { .. }) => self.router.resolve(actor, None).await,
            other => other,
        }
    }
}

/// Remove the worker's own queue entry if nothing is waiting in it.
///
/// Returns whether the worker may exit. A queue entry that belongs to another
/// channel is left alone; this worker then exits once its backlog is drained.
fn retire(
    queues: &Queues,
    actor: &ActorId,
    me: &mpsc::WeakSender<Job>,
    jobs: &mpsc::Receiver<Job>,
) -> bool {
    let removed = queues.remove_if(actor, |_, queue| {
        jobs.is_empty()
            && me
                .upgrade()
                .map_or(false, |mine| queue.same_channel(&mine))
    });
    removed.is_some() || jobs.is_empty()
}

/// Same hops and same lease grant. A refreshed expiry is not a new path.
fn same_path(a: &Route, b: &Route) -> bool {
    a.hops() == b.hops()
        && a.binding().map(|binding| binding.lease_id) == b.binding().map(|binding| binding.lease_id)
}

/// Sends envelopes to actors in per-actor FIFO order.
#[derive(Debug)]
pub struct MessageDispatcher {
    courier: Arc<Courier>,
    queues: Arc<Queues>,
    cancel: CancellationToken,
}

impl MessageDispatcher {
    /// Create a dispatcher. Workers are spawned on the current Tokio runtime.
    pub fn new(router: Arc<ActorRouter>, transport: Arc<dyn Transport>, config: DispatchConfig) -> Self {
        Self {
            courier: Arc::new(Courier {
                router,
                transport,
                config,
            }),
            queues: Arc::new(DashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Enqueue `envelope` for `actor` and wait for the outcome.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::Failed`] when every attempt hit a stale route.
    /// - [`DispatchError::Routing`] for `Unroutable` and `NoEligibleNode`.
    /// - [`DispatchError::Transport`] when the destination rejected it.
    #[tracing::instrument(skip_all, fields(actor = %actor, method = %envelope.method_name))]
    pub async fn send(
        &self,
        actor: &ActorId,
        envelope: MessageEnvelope,
    ) -> Result<SendOutcome, DispatchError> {
        check_target(actor, &envelope)?;
        let (reply, outcome) = oneshot::channel();
        let mut job = Job { envelope, reply };
        loop {
            match self.enqueue(actor, job)? {
                Enqueued::Accepted => break,
                Enqueued::Full(rejected, queue) => {
                    job = rejected;
                    // Wait for room outside the entry lock, then enqueue again.
                    if let Ok(permit) = queue.reserve().await {
                        drop(permit);
                    }
                }
            }
        }
        PendingDelivery {
            actor: actor.clone(),
            outcome,
        }
        .wait()
        .await
    }

    /// Enqueue `envelope` without waiting.
    ///
    /// Messages submitted in sequence are delivered in that sequence.
    ///
    /// # Errors
    ///
    /// [`DispatchError::QueueFull`] if the actor's queue is at capacity.
    pub fn submit(
        &self,
        actor: &ActorId,
        envelope: MessageEnvelope,
    ) -> Result<PendingDelivery, DispatchError> {
        check_target(actor, &envelope)?;
        let (reply, outcome) = oneshot::channel();
        if let Enqueued::Full(..) = self.enqueue(actor, Job { envelope, reply })? {
            return Err(DispatchError::QueueFull {
                actor: actor.clone(),
            });
        }
        Ok(PendingDelivery {
            actor: actor.clone(),
            outcome,
        })
    }

    /// Number of actors with a live worker.
    pub fn active_queues(&self) -> usize {
        self.queues.iter().filter(|queue| !queue.is_closed()).count()
    }

    /// Stop every worker. Queued messages fail with [`DispatchError::Closed`].
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.queues.clear();
    }

    /// Push `job` onto the actor's queue while holding its entry lock.
    fn enqueue(&self, actor: &ActorId, job: Job) -> Result<Enqueued, DispatchError> {
        if self.cancel.is_cancelled() {
            return Err(DispatchError::Closed {
                actor: actor.clone(),
            });
        }
        let queue = match self.queues.entry(actor.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_closed() {
                    occupied.insert(self.spawn_worker(actor));
                }
                occupied.into_ref()
            }
            Entry::Vacant(vacant) => vacant.insert(self.spawn_worker(actor)),
        };
        match queue.try_send(job) {
            Ok(()) => Ok(Enqueued::Accepted),
            Err(mpsc::error::TrySendError::Full(job)) => {
                Ok(Enqueued::Full(job, queue.value().clone()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DispatchError::Closed {
                actor: actor.clone(),
            }),
        }
    }

    fn spawn_worker(&self, actor: &ActorId) -> mpsc::Sender<Job> {
        let (tx, rx) = mpsc::channel(self.courier.config.queue_capacity.max(1));
        tokio::spawn(self.courier.clone().run_worker(
            actor.clone(),
            rx,
            tx.downgrade(),
            self.queues.clone(),
            self.cancel.child_token(),
        ));
        tracing::debug!(actor = %actor, "dispatch worker started");
        tx
    }
}

impl Drop for MessageDispatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn check_target(actor: &ActorId, envelope: &MessageEnvelope) -> Result<(), DispatchError> {
    let envelope_target = envelope.target();
    if &envelope_target != actor {
        return Err(DispatchError::Misaddressed {
            actor: actor.clone(),
            envelope_target,
        });
    }
    Ok(())
}
