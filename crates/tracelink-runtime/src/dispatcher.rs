//! Request dispatcher
//!
//! The engine behind the SDK: one logic task owns the pending queue, the
//! session state machine and the session context, and is the single mutation
//! point for all of them. Commands arrive over a channel; eligible envelopes
//! dispatch one at a time through the network executor.
//!
//! Dispatch rules:
//! - at most one network call in flight, so queue order is completion order
//! - the head envelope defers while it needs a session that is not yet
//!   initialized, keeping its position
//! - retryable failures re-enter at the head with exponential backoff;
//!   terminal outcomes fire the envelope's completion slot exactly once
//! - a call that outlives its timeout is abandoned and reported as a
//!   timeout; a late resolution has nowhere to land

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use uuid::Uuid;

use tracelink_core::envelope::now_ms;
use tracelink_core::errors::{QueueError, SessionError, TracelinkError};
use tracelink_core::{
    BeginInit, OutcomeSender, PendingQueue, RequestEnvelope, RequestKind, RequestOutcome,
    SessionContext, SessionState, SessionTracker, TracelinkConfig,
};

use crate::executor::NetworkExecutor;

// ----------------------------------------------------------------------------
// Commands
// ----------------------------------------------------------------------------

/// Commands sent from client handles to the dispatcher task
#[derive(Debug)]
pub enum DispatcherCommand {
    /// Enqueue a request envelope
    Submit { envelope: RequestEnvelope },
    /// Start (or attach to) a session initialization
    InitSession { waiter: Option<OutcomeSender> },
    /// Close the current session
    CloseSession { waiter: Option<OutcomeSender> },
    /// A host foreground activity became visible
    ActivityStarted,
    /// A host foreground activity went away
    ActivityStopped,
    /// Abandon a pending request before it dispatches
    Remove { id: Uuid },
    /// Cancel every pending request, reporting `reason` to each waiter
    CancelAll { reason: String },
    /// Snapshot dispatch statistics
    QueryStats {
        reply: oneshot::Sender<DispatchStats>,
    },
    /// Cancel pending work and stop the task
    Shutdown,
}

// ----------------------------------------------------------------------------
// Statistics
// ----------------------------------------------------------------------------

/// Counters and state snapshot reported by the dispatcher
#[derive(Debug, Clone, Serialize)]
pub struct DispatchStats {
    pub submitted: u64,
    pub dispatched: u64,
    pub completed: u64,
    pub retried: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub pending: usize,
    pub session_state: SessionState,
}

impl Default for DispatchStats {
    fn default() -> Self {
        Self {
            submitted: 0,
            dispatched: 0,
            completed: 0,
            retried: 0,
            failed: 0,
            timed_out: 0,
            cancelled: 0,
            pending: 0,
            session_state: SessionState::Uninitialized,
        }
    }
}

// ----------------------------------------------------------------------------
// Dispatcher
// ----------------------------------------------------------------------------

/// The dispatch task. Constructed by the builder and consumed by `run`.
pub struct Dispatcher {
    config: TracelinkConfig,
    queue: PendingQueue,
    session: SessionTracker,
    context: SessionContext,
    executor: Arc<dyn NetworkExecutor>,
    commands: mpsc::Receiver<DispatcherCommand>,
    /// Waiters coalesced onto an init attempt whose envelope is not
    /// reachable in the queue at attach time
    init_waiters: Vec<OutcomeSender>,
    /// Deadline before the head envelope may be retried
    next_attempt_at: Option<Instant>,
    stats: DispatchStats,
    running: bool,
}

impl Dispatcher {
    pub fn new(
        config: TracelinkConfig,
        queue: PendingQueue,
        context: SessionContext,
        executor: Arc<dyn NetworkExecutor>,
        commands: mpsc::Receiver<DispatcherCommand>,
    ) -> Self {
        Self {
            config,
            queue,
            session: SessionTracker::new(),
            context,
            executor,
            commands,
            init_waiters: Vec::new(),
            next_attempt_at: None,
            stats: DispatchStats::default(),
            running: true,
        }
    }

    /// Run the dispatch loop until shutdown or all handles drop
    pub async fn run(mut self) {
        tracing::info!("dispatcher starting");

        while self.running {
            // Absorb every command already queued before touching the
            // network, so a burst of submissions lands in queue order and
            // coalescing sees the full picture.
            while let Ok(command) = self.commands.try_recv() {
                self.handle_command(command);
                if !self.running {
                    break;
                }
            }
            if !self.running {
                break;
            }

            self.drain_ready().await;

            let backoff = self.next_attempt_at;
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command),
                        None => {
                            tracing::info!("all handles dropped, stopping dispatcher");
                            self.cancel_all("client dropped");
                            self.running = false;
                        }
                    }
                }
                _ = async { tokio::time::sleep_until(backoff.unwrap_or_else(Instant::now)).await },
                    if backoff.is_some() =>
                {
                    self.next_attempt_at = None;
                }
            }
        }

        tracing::info!("dispatcher stopped");
    }

    // ------------------------------------------------------------------------
    // Command handling
    // ------------------------------------------------------------------------

    fn handle_command(&mut self, command: DispatcherCommand) {
        match command {
            DispatcherCommand::Submit { envelope } => self.submit(envelope),
            DispatcherCommand::InitSession { waiter } => self.init_session(waiter),
            DispatcherCommand::CloseSession { waiter } => self.close_session(waiter),
            DispatcherCommand::ActivityStarted => {
                let count = self.session.activity_started();
                tracing::debug!(count, "foreground activity started");
                if count == 1
                    && self.config.session.auto_session
                    && self.session.state() == SessionState::Uninitialized
                {
                    self.init_session(None);
                }
            }
            DispatcherCommand::ActivityStopped => {
                let count = self.session.activity_stopped();
                tracing::debug!(count, "foreground activity stopped");
                if count < 1 {
                    self.close_session(None);
                }
            }
            DispatcherCommand::Remove { id } => {
                if let Some(mut envelope) = self.queue.remove(id) {
                    envelope
                        .callback
                        .fire(&Err(TracelinkError::cancelled("removed before dispatch")));
                    self.stats.cancelled += 1;
                }
            }
            DispatcherCommand::CancelAll { reason } => self.cancel_all(&reason),
            DispatcherCommand::QueryStats { reply } => {
                let _ = reply.send(self.snapshot());
            }
            DispatcherCommand::Shutdown => {
                self.cancel_all("shutdown");
                self.running = false;
            }
        }
    }

    fn submit(&mut self, mut envelope: RequestEnvelope) {
        self.stats.submitted += 1;

        if self.queue.is_full() {
            tracing::warn!(kind = %envelope.kind, "queue full, rejecting request");
            envelope.callback.fire(&Err(TracelinkError::Queue(QueueError::Full {
                capacity: self.config.queue.max_pending,
            })));
            self.stats.failed += 1;
            return;
        }
        if let Err(e) = self.queue.enqueue(envelope) {
            tracing::warn!("enqueue failed: {e}");
        }
    }

    fn init_session(&mut self, waiter: Option<OutcomeSender>) {
        match self.session.begin_init() {
            BeginInit::Started => {
                // A persisted init envelope may already be waiting after a
                // restart; this attempt belongs to it.
                if let Some(pending) = self.queue.find_session_init_mut() {
                    if let Some(waiter) = waiter {
                        pending.callback.attach(waiter);
                    }
                    return;
                }

                let kind = self.context.init_kind();
                let mut envelope = match RequestEnvelope::new(kind, serde_json::json!({})) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        if let Err(unwind) = self.session.complete_init(false) {
                            tracing::warn!("init unwind failed: {unwind}");
                        }
                        if let Some(waiter) = waiter {
                            let _ = waiter.send(Err(e.into()));
                        }
                        return;
                    }
                };
                if let Some(waiter) = waiter {
                    envelope.callback.attach(waiter);
                }
                tracing::debug!(kind = %kind, "session initialization queued");
                if let Err(e) = self.queue.enqueue(envelope) {
                    tracing::warn!("enqueue failed: {e}");
                }
            }
            BeginInit::AlreadyInFlight => {
                if let Some(waiter) = waiter {
                    match self.queue.find_session_init_mut() {
                        Some(pending) => pending.callback.attach(waiter),
                        None => self.init_waiters.push(waiter),
                    }
                }
            }
            BeginInit::AlreadyInitialized => {
                if let Some(waiter) = waiter {
                    let response = self
                        .context
                        .last_init_response()
                        .cloned()
                        .unwrap_or_else(|| serde_json::json!({}));
                    let _ = waiter.send(Ok(response));
                }
            }
        }
    }

    fn close_session(&mut self, waiter: Option<OutcomeSender>) {
        if !self.session.begin_close() {
            if let Some(waiter) = waiter {
                let _ = waiter.send(Err(SessionError::NotInitialized.into()));
            }
            return;
        }

        let mut envelope = match RequestEnvelope::new(RequestKind::RegisterClose, serde_json::json!({}))
        {
            Ok(envelope) => envelope,
            Err(e) => {
                if let Some(waiter) = waiter {
                    let _ = waiter.send(Err(e.into()));
                }
                return;
            }
        };
        if let Some(waiter) = waiter {
            envelope.callback.attach(waiter);
        }
        tracing::debug!("session close queued");
        if let Err(e) = self.queue.enqueue(envelope) {
            tracing::warn!("enqueue failed: {e}");
        }
    }

    fn cancel_all(&mut self, reason: &str) {
        let outcome: RequestOutcome = Err(TracelinkError::cancelled(reason));
        for mut envelope in self.queue.drain_all() {
            envelope.callback.fire(&outcome);
            self.stats.cancelled += 1;
        }
        for waiter in self.init_waiters.drain(..) {
            let _ = waiter.send(outcome.clone());
        }
        if self.session.state() == SessionState::Initializing {
            if let Err(e) = self.session.complete_init(false) {
                tracing::warn!("init unwind failed: {e}");
            }
        }
        self.next_attempt_at = None;
        tracing::info!(reason, "pending requests cancelled");
    }

    fn snapshot(&self) -> DispatchStats {
        let mut stats = self.stats.clone();
        stats.pending = self.queue.len();
        stats.session_state = self.session.state();
        stats
    }

    // ------------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------------

    /// Dispatch eligible head envelopes until the queue is empty, the head
    /// is gated on the session, or a retry backoff is pending
    async fn drain_ready(&mut self) {
        loop {
            if let Some(at) = self.next_attempt_at {
                if Instant::now() < at {
                    return;
                }
                self.next_attempt_at = None;
            }

            match self.queue.peek_next() {
                None => return,
                Some(head)
                    if head.requires_session()
                        && self.session.state() != SessionState::Initialized =>
                {
                    tracing::debug!(kind = %head.kind, "blocked on session");
                    return;
                }
                Some(_) => {}
            }

            self.execute_head().await;
        }
    }

    /// Perform one network attempt for the head envelope and apply the
    /// outcome.
    ///
    /// The envelope stays at the head (and in the durable store) for the
    /// whole attempt; only a terminal outcome removes it. The single loop
    /// is what guarantees it cannot be dispatched twice concurrently.
    async fn execute_head(&mut self) {
        let default_timeout = self.config.dispatch.default_timeout;
        let (kind, id, timeout, retry_count) = {
            let Some(head) = self.queue.head_mut() else {
                return;
            };
            let timeout = head.timeout(default_timeout);
            let kind = head.kind;
            self.context.enrich(kind, &mut head.payload);
            (kind, head.id, timeout, head.retry_count)
        };
        self.queue.flush_to_store();

        self.stats.dispatched += 1;
        tracing::debug!(
            kind = %kind,
            id = %id,
            attempt = retry_count + 1,
            age_ms = self.queue.peek_next().map_or(0, |e| e.age(now_ms()).as_millis() as u64),
            "dispatching"
        );

        let executor = Arc::clone(&self.executor);
        let outcome = {
            let Some(head) = self.queue.peek_next() else {
                return;
            };
            match tokio::time::timeout(timeout, executor.execute(head, timeout)).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(network)) => Err(TracelinkError::Network(network)),
                Err(_elapsed) => {
                    // The in-flight future is dropped here; a response
                    // arriving after this point has nowhere to land.
                    self.stats.timed_out += 1;
                    Err(TracelinkError::timed_out(timeout.as_millis() as u64))
                }
            }
        };

        match outcome {
            Err(error)
                if error.is_retryable() && retry_count < self.config.dispatch.max_retries =>
            {
                if let Some(head) = self.queue.head_mut() {
                    head.retry_count += 1;
                }
                self.queue.flush_to_store();
                let delay = self.config.dispatch.retry_delay(retry_count + 1);
                tracing::debug!(
                    kind = %kind,
                    retry = retry_count + 1,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after failure: {error}"
                );
                self.stats.retried += 1;
                self.next_attempt_at = Some(Instant::now() + delay);
            }
            terminal => {
                if let Some(envelope) = self.queue.pop_next() {
                    self.finish(envelope, terminal);
                }
            }
        }
    }

    /// Deliver a terminal outcome and apply its session side effects
    fn finish(&mut self, mut envelope: RequestEnvelope, outcome: RequestOutcome) {
        let success = outcome.is_ok();

        if envelope.kind.is_session_init() {
            if let Err(e) = self.session.complete_init(success) {
                tracing::warn!("init completion out of order: {e}");
            }
            if let Ok(response) = &outcome {
                self.context.absorb_init_response(response);
            }
            // Coalesced callers resolve with the same outcome as the
            // attempt they attached to.
            for waiter in self.init_waiters.drain(..) {
                envelope.callback.attach(waiter);
            }
        }
        if envelope.kind.is_session_close() && success {
            self.context.clear_session();
        }
        if envelope.kind == RequestKind::Logout && success {
            self.context.clear_identity();
        }

        if success {
            self.stats.completed += 1;
        } else {
            self.stats.failed += 1;
        }
        tracing::debug!(kind = %envelope.kind, id = %envelope.id, success, "request finished");
        envelope.callback.fire(&outcome);
    }
}
