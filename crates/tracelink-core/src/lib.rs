//! Tracelink core
//!
//! Data model and state for the Tracelink attribution SDK: the request
//! envelope and operation catalogue, the durable pending queue, the session
//! lifecycle state machine, the session context that enriches outgoing
//! payloads, configuration, and the error taxonomy.
//!
//! The dispatch engine lives in `tracelink-runtime`; this crate has no I/O
//! loop of its own.

pub mod config;
pub mod context;
pub mod envelope;
pub mod errors;
pub mod keys;
pub mod queue;
pub mod session;
pub mod store;

pub use config::{
    DispatchConfig, NetworkConfig, QueueConfig, SessionConfig, TracelinkConfig,
    TracelinkConfigBuilder,
};
pub use context::{
    AdvertisingId, AdvertisingIdProvider, MetadataProvider, SessionContext, StaticMetadata,
};
pub use envelope::{
    CallbackSlot, OutcomeReceiver, OutcomeSender, Priority, RequestEnvelope, RequestKind,
    RequestOutcome,
};
pub use errors::{
    NetworkError, QueueError, Result, SessionError, TracelinkError, TracelinkResult,
    ValidationError,
};
pub use queue::PendingQueue;
pub use session::{BeginInit, SessionState, SessionTracker};
pub use store::{MemoryRecordStore, RecordStore, SqliteRecordStore};
