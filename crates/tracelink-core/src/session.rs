//! Session lifecycle state machine
//!
//! Tracks whether an attribution session is uninitialized, initializing, or
//! initialized, and counts the host's visible foreground activities. The
//! dispatcher is the single mutation point; everything else reads.
//!
//! Transitions:
//! - uninitialized → initializing on the first foreground activity or an
//!   explicit init call
//! - initializing → initialized on a successful init response
//! - initializing → uninitialized on init failure or timeout
//! - initialized → uninitialized when the last foreground activity closes
//!
//! No transition skips a state, and `complete_init` is the only way out of
//! `Initializing`.

use serde::{Deserialize, Serialize};

use crate::errors::SessionError;

// ----------------------------------------------------------------------------
// Session State
// ----------------------------------------------------------------------------

/// Global session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Initialized,
}

impl SessionState {
    pub fn state_name(&self) -> &'static str {
        match self {
            SessionState::Uninitialized => "Uninitialized",
            SessionState::Initializing => "Initializing",
            SessionState::Initialized => "Initialized",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.state_name())
    }
}

/// Result of asking the tracker to begin initialization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginInit {
    /// A new init attempt was started; the caller owns issuing the request
    Started,
    /// An attempt is already in flight; attach to its outcome
    AlreadyInFlight,
    /// The session is already up; answer from current session data
    AlreadyInitialized,
}

// ----------------------------------------------------------------------------
// Session Tracker
// ----------------------------------------------------------------------------

/// The session state machine plus the foreground activity counter driving it
#[derive(Debug)]
pub struct SessionTracker {
    state: SessionState,
    foreground_activities: i32,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self {
            state: SessionState::Uninitialized,
            foreground_activities: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Begin a session initialization attempt.
    ///
    /// At most one init is in flight at any time; that is enforced here, not
    /// by the queue. Re-entrant calls while initializing attach to the
    /// existing attempt.
    pub fn begin_init(&mut self) -> BeginInit {
        match self.state {
            SessionState::Uninitialized => {
                tracing::debug!("session transition: Uninitialized -> Initializing");
                self.state = SessionState::Initializing;
                BeginInit::Started
            }
            SessionState::Initializing => BeginInit::AlreadyInFlight,
            SessionState::Initialized => BeginInit::AlreadyInitialized,
        }
    }

    /// Resolve the in-flight init attempt.
    ///
    /// The only exit from `Initializing`; invoked exactly once per attempt
    /// by the dispatcher after the network outcome is terminal.
    pub fn complete_init(&mut self, success: bool) -> Result<(), SessionError> {
        if self.state != SessionState::Initializing {
            return Err(SessionError::InvalidTransition {
                from: self.state.state_name().to_string(),
                event: "complete_init".to_string(),
            });
        }
        self.state = if success {
            SessionState::Initialized
        } else {
            SessionState::Uninitialized
        };
        tracing::debug!("session transition: Initializing -> {}", self.state);
        Ok(())
    }

    /// End the current session.
    ///
    /// Returns true when there was an initialized session to close, so the
    /// caller knows to issue the close request. Closing while initializing
    /// is a no-op; the in-flight attempt resolves normally.
    pub fn begin_close(&mut self) -> bool {
        match self.state {
            SessionState::Initialized => {
                tracing::debug!("session transition: Initialized -> Uninitialized");
                self.state = SessionState::Uninitialized;
                true
            }
            _ => false,
        }
    }

    /// Record a foreground activity appearing; returns the new count
    pub fn activity_started(&mut self) -> i32 {
        self.foreground_activities += 1;
        self.foreground_activities
    }

    /// Record a foreground activity closing; returns the new count
    pub fn activity_stopped(&mut self) -> i32 {
        self.foreground_activities -= 1;
        self.foreground_activities
    }

    pub fn foreground_activities(&self) -> i32 {
        self.foreground_activities
    }

    /// Whether any host activity is currently visible
    pub fn is_foreground(&self) -> bool {
        self.foreground_activities > 0
    }
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let tracker = SessionTracker::new();
        assert_eq!(tracker.state(), SessionState::Uninitialized);
        assert!(!tracker.is_foreground());
    }

    #[test]
    fn test_init_happy_path() {
        let mut tracker = SessionTracker::new();
        assert_eq!(tracker.begin_init(), BeginInit::Started);
        assert_eq!(tracker.state(), SessionState::Initializing);

        tracker.complete_init(true).unwrap();
        assert_eq!(tracker.state(), SessionState::Initialized);
    }

    #[test]
    fn test_init_failure_returns_to_uninitialized() {
        let mut tracker = SessionTracker::new();
        tracker.begin_init();
        tracker.complete_init(false).unwrap();
        assert_eq!(tracker.state(), SessionState::Uninitialized);

        // The session may be retried from scratch.
        assert_eq!(tracker.begin_init(), BeginInit::Started);
    }

    #[test]
    fn test_reentrant_init_coalesces() {
        let mut tracker = SessionTracker::new();
        assert_eq!(tracker.begin_init(), BeginInit::Started);
        assert_eq!(tracker.begin_init(), BeginInit::AlreadyInFlight);

        tracker.complete_init(true).unwrap();
        assert_eq!(tracker.begin_init(), BeginInit::AlreadyInitialized);
    }

    #[test]
    fn test_complete_init_requires_initializing() {
        let mut tracker = SessionTracker::new();
        assert!(matches!(
            tracker.complete_init(true),
            Err(SessionError::InvalidTransition { .. })
        ));

        tracker.begin_init();
        tracker.complete_init(true).unwrap();
        assert!(tracker.complete_init(true).is_err());
    }

    #[test]
    fn test_close_only_from_initialized() {
        let mut tracker = SessionTracker::new();
        assert!(!tracker.begin_close());

        tracker.begin_init();
        assert!(!tracker.begin_close());
        assert_eq!(tracker.state(), SessionState::Initializing);

        tracker.complete_init(true).unwrap();
        assert!(tracker.begin_close());
        assert_eq!(tracker.state(), SessionState::Uninitialized);
    }

    #[test]
    fn test_activity_counting() {
        let mut tracker = SessionTracker::new();
        assert_eq!(tracker.activity_started(), 1);
        assert_eq!(tracker.activity_started(), 2);
        assert!(tracker.is_foreground());

        assert_eq!(tracker.activity_stopped(), 1);
        assert_eq!(tracker.activity_stopped(), 0);
        assert!(!tracker.is_foreground());
    }
}
