//! Lifecycle gate
//!
//! Hosts drive session boundaries through this handle: foreground activity
//! appearing and disappearing, plus an explicit close for hosts that manage
//! sessions themselves. These are the only inputs that move the session
//! state machine besides network outcomes, and they all funnel through the
//! dispatcher's command channel so session mutation stays single-threaded.

use tokio::sync::mpsc;

use tracelink_core::errors::{TracelinkError, TracelinkResult};

use crate::dispatcher::DispatcherCommand;

/// Host-visible lifecycle signals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A foreground activity became visible (+1)
    ForegroundActivityStarted,
    /// A foreground activity went away (-1)
    ForegroundActivityStopped,
    /// The host asked for the session to end now
    ExplicitClose,
}

/// Handle for delivering lifecycle events into the dispatcher
#[derive(Debug, Clone)]
pub struct LifecycleGate {
    commands: mpsc::Sender<DispatcherCommand>,
}

impl LifecycleGate {
    pub(crate) fn new(commands: mpsc::Sender<DispatcherCommand>) -> Self {
        Self { commands }
    }

    /// Deliver a lifecycle event
    pub async fn signal(&self, event: LifecycleEvent) -> TracelinkResult<()> {
        let command = match event {
            LifecycleEvent::ForegroundActivityStarted => DispatcherCommand::ActivityStarted,
            LifecycleEvent::ForegroundActivityStopped => DispatcherCommand::ActivityStopped,
            LifecycleEvent::ExplicitClose => DispatcherCommand::CloseSession { waiter: None },
        };
        self.commands
            .send(command)
            .await
            .map_err(|_| TracelinkError::shutdown("dispatcher stopped"))
    }

    /// A foreground activity became visible
    pub async fn activity_started(&self) -> TracelinkResult<()> {
        self.signal(LifecycleEvent::ForegroundActivityStarted).await
    }

    /// A foreground activity went away
    pub async fn activity_stopped(&self) -> TracelinkResult<()> {
        self.signal(LifecycleEvent::ForegroundActivityStopped).await
    }

    /// End the session now, regardless of activity count
    pub async fn explicit_close(&self) -> TracelinkResult<()> {
        self.signal(LifecycleEvent::ExplicitClose).await
    }
}
