//! Request envelopes
//!
//! A [`RequestEnvelope`] is the unit of work flowing through the SDK: an
//! operation kind, its JSON payload, retry and priority bookkeeping, and a
//! completion slot that is fired exactly once with the terminal outcome.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::errors::{TracelinkError, ValidationError};
use crate::keys;

// ----------------------------------------------------------------------------
// Request Kinds
// ----------------------------------------------------------------------------

/// Operation catalogue for the attribution service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    /// First-ever session start on this device
    RegisterInstall,
    /// Session start on a device that has installed before
    RegisterOpen,
    /// Session end
    RegisterClose,
    /// Create a short deep link
    GetUrl,
    /// Redeem accumulated reward credits
    RedeemRewards,
    /// Fetch the credit transaction history
    GetCreditHistory,
    /// Report a completed user action
    CompletedAction,
    /// Attach a developer identity to the current user
    IdentifyUser,
    /// Detach the developer identity
    Logout,
    /// Create a referral code
    GetReferralCode,
    /// Check a referral code without applying it
    ValidateReferralCode,
    /// Apply a referral code to the current user
    ApplyReferralCode,
    /// Look up the user's cross-platform identifiers
    GetCrossPlatformIds,
    /// Look up the last attributed touch data
    GetLastAttributedTouchData,
}

impl RequestKind {
    /// Server path for this operation
    pub fn path(&self) -> &'static str {
        match self {
            RequestKind::RegisterInstall => "v1/install",
            RequestKind::RegisterOpen => "v1/open",
            RequestKind::RegisterClose => "v1/close",
            RequestKind::GetUrl => "v1/url",
            RequestKind::RedeemRewards => "v1/redeem",
            RequestKind::GetCreditHistory => "v1/credithistory",
            RequestKind::CompletedAction => "v1/event",
            RequestKind::IdentifyUser => "v1/profile",
            RequestKind::Logout => "v1/logout",
            RequestKind::GetReferralCode => "v1/referralcode",
            RequestKind::ValidateReferralCode => "v1/referralcode/validate",
            RequestKind::ApplyReferralCode => "v1/applycode",
            RequestKind::GetCrossPlatformIds => "v1/cpid",
            RequestKind::GetLastAttributedTouchData => "v1/cpid/latd",
        }
    }

    /// Whether this operation starts a session
    pub fn is_session_init(&self) -> bool {
        matches!(
            self,
            RequestKind::RegisterInstall | RequestKind::RegisterOpen
        )
    }

    /// Whether this operation ends a session
    pub fn is_session_close(&self) -> bool {
        matches!(self, RequestKind::RegisterClose)
    }

    /// Whether dispatch must wait for an initialized session.
    ///
    /// Session open/close envelopes are exempt; everything else rides on the
    /// session the init response established.
    pub fn requires_session(&self) -> bool {
        !self.is_session_init() && !self.is_session_close()
    }

    /// Validate the payload shape for this operation.
    ///
    /// Runs before a request is queued; failures are reported synchronously
    /// and never enter the queue.
    pub fn validate_payload(&self, payload: &Value) -> Result<(), ValidationError> {
        let obj = payload.as_object().ok_or_else(|| ValidationError::NotAnObject {
            kind: self.to_string(),
        })?;

        let require = |field: &'static str| -> Result<&Value, ValidationError> {
            obj.get(field).ok_or(ValidationError::MissingField {
                kind: self.to_string(),
                field,
            })
        };
        let require_string = |field: &'static str| -> Result<(), ValidationError> {
            let value = require(field)?;
            if value.is_string() {
                Ok(())
            } else {
                Err(ValidationError::WrongType {
                    kind: self.to_string(),
                    field,
                    expected: "a string",
                })
            }
        };
        let require_number = |field: &'static str| -> Result<(), ValidationError> {
            let value = require(field)?;
            if value.is_u64() || value.is_i64() {
                Ok(())
            } else {
                Err(ValidationError::WrongType {
                    kind: self.to_string(),
                    field,
                    expected: "an integer",
                })
            }
        };

        match self {
            RequestKind::RedeemRewards => {
                require_string(keys::BUCKET)?;
                require_number(keys::AMOUNT)?;
            }
            RequestKind::CompletedAction => {
                require_string(keys::EVENT)?;
            }
            RequestKind::IdentifyUser => {
                require_string(keys::IDENTITY)?;
            }
            RequestKind::GetReferralCode => {
                require_number(keys::AMOUNT)?;
            }
            RequestKind::ValidateReferralCode | RequestKind::ApplyReferralCode => {
                require_string(keys::REFERRAL_CODE)?;
            }
            _ => {}
        }
        Ok(())
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RequestKind::RegisterInstall => "RegisterInstall",
            RequestKind::RegisterOpen => "RegisterOpen",
            RequestKind::RegisterClose => "RegisterClose",
            RequestKind::GetUrl => "GetUrl",
            RequestKind::RedeemRewards => "RedeemRewards",
            RequestKind::GetCreditHistory => "GetCreditHistory",
            RequestKind::CompletedAction => "CompletedAction",
            RequestKind::IdentifyUser => "IdentifyUser",
            RequestKind::Logout => "Logout",
            RequestKind::GetReferralCode => "GetReferralCode",
            RequestKind::ValidateReferralCode => "ValidateReferralCode",
            RequestKind::ApplyReferralCode => "ApplyReferralCode",
            RequestKind::GetCrossPlatformIds => "GetCrossPlatformIds",
            RequestKind::GetLastAttributedTouchData => "GetLastAttributedTouchData",
        };
        write!(f, "{name}")
    }
}

// ----------------------------------------------------------------------------
// Completion Slot
// ----------------------------------------------------------------------------

/// Terminal outcome delivered to request callers
pub type RequestOutcome = Result<Value, TracelinkError>;

/// Sending half of a request completion channel
pub type OutcomeSender = oneshot::Sender<RequestOutcome>;

/// Receiving half of a request completion channel
pub type OutcomeReceiver = oneshot::Receiver<RequestOutcome>;

/// Completion slot for an envelope.
///
/// Holds every waiter attached to the request (coalesced session inits can
/// attach several) and fires them all with one terminal outcome. Firing is
/// a consuming operation on the waiters; a slot never delivers twice.
#[derive(Debug, Default)]
pub struct CallbackSlot {
    waiters: Vec<OutcomeSender>,
    fired: bool,
}

impl CallbackSlot {
    /// Create a slot with a single waiter
    pub fn single(sender: OutcomeSender) -> Self {
        Self {
            waiters: vec![sender],
            fired: false,
        }
    }

    /// Attach another waiter to this request
    pub fn attach(&mut self, sender: OutcomeSender) {
        if self.fired {
            tracing::debug!("ignoring waiter attached after completion");
            return;
        }
        self.waiters.push(sender);
    }

    /// Number of waiters currently attached
    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }

    /// Deliver the terminal outcome to every waiter.
    ///
    /// Subsequent calls are no-ops, so a late network resolution after a
    /// synthesized timeout cannot reach the caller.
    pub fn fire(&mut self, outcome: &RequestOutcome) {
        if self.fired {
            tracing::debug!("completion already delivered, discarding outcome");
            return;
        }
        self.fired = true;
        for waiter in self.waiters.drain(..) {
            // A dropped receiver means the caller abandoned interest.
            let _ = waiter.send(outcome.clone());
        }
    }

    /// Whether the terminal outcome has been delivered
    pub fn is_fired(&self) -> bool {
        self.fired
    }
}

// ----------------------------------------------------------------------------
// Request Envelope
// ----------------------------------------------------------------------------

/// Queue position preference for an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    /// Appended at the tail, dispatched in insertion order
    Normal,
    /// Inserted at the head, ahead of all pending work
    Front,
}

/// The unit of work: one server operation with its payload, retry state and
/// completion slot
#[derive(Debug, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Unique per enqueue, used for idempotence and remove-by-id
    pub id: Uuid,
    pub kind: RequestKind,
    /// JSON object request body
    pub payload: Value,
    pub priority: Priority,
    /// Attempts already made (0 before first dispatch)
    pub retry_count: u32,
    /// Enqueue timestamp, milliseconds since the Unix epoch
    pub created_at: u64,
    /// Exempt from session gating even though the kind normally requires one
    pub session_independent: bool,
    /// Per-call override of the default network timeout, in milliseconds
    pub timeout_ms: Option<u64>,
    /// Completion slot. Not persisted: envelopes reloaded from the durable
    /// store replay without listeners.
    #[serde(skip, default)]
    pub callback: CallbackSlot,
}

impl RequestEnvelope {
    /// Build a validated envelope for the given operation.
    ///
    /// Payload shape failures are returned synchronously; the envelope is
    /// never constructed.
    pub fn new(kind: RequestKind, payload: Value) -> Result<Self, ValidationError> {
        kind.validate_payload(&payload)?;
        let priority = if kind.is_session_init() || kind.is_session_close() {
            Priority::Front
        } else {
            Priority::Normal
        };
        Ok(Self {
            id: Uuid::new_v4(),
            kind,
            payload,
            priority,
            retry_count: 0,
            created_at: now_ms(),
            session_independent: false,
            timeout_ms: None,
            callback: CallbackSlot::default(),
        })
    }

    /// Attach a completion waiter
    pub fn with_callback(mut self, sender: OutcomeSender) -> Self {
        self.callback.attach(sender);
        self
    }

    /// Mark the envelope exempt from session gating
    pub fn session_independent(mut self) -> Self {
        self.session_independent = true;
        self
    }

    /// Override the queue position preference
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Override the network timeout for this call only
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Effective timeout given the configured default
    pub fn timeout(&self, default: Duration) -> Duration {
        self.timeout_ms.map(Duration::from_millis).unwrap_or(default)
    }

    /// Age of the envelope relative to `now` (milliseconds since epoch)
    pub fn age(&self, now: u64) -> Duration {
        Duration::from_millis(now.saturating_sub(self.created_at))
    }

    /// Whether dispatch must wait for an initialized session
    pub fn requires_session(&self) -> bool {
        self.kind.requires_session() && !self.session_independent
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
