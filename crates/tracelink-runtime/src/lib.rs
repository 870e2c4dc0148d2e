//! Tracelink runtime engine
//!
//! This crate contains the dispatch engine for the Tracelink attribution
//! SDK, including:
//! - `Dispatcher`: the logic task draining the durable request queue
//! - `NetworkExecutor`: the transport boundary, with a reqwest-backed default
//! - `LifecycleGate`: host foreground/background signals
//! - `Tracelink` / `TracelinkBuilder`: the public client handle
//!
//! `tracelink-core` provides the data model and state; this crate is the
//! engine that moves it.

pub mod client;
pub mod dispatcher;
pub mod executor;
pub mod lifecycle;

pub use client::{LinkProperties, Tracelink, TracelinkBuilder};
pub use dispatcher::{DispatchStats, Dispatcher, DispatcherCommand};
pub use executor::{HttpNetworkExecutor, NetworkExecutor};
pub use lifecycle::{LifecycleEvent, LifecycleGate};

// Re-export core types for convenience
pub use tracelink_core::{
    AdvertisingId, AdvertisingIdProvider, MetadataProvider, NetworkError, QueueError,
    RequestKind, SessionError, SessionState, StaticMetadata, TracelinkConfig, TracelinkError,
    TracelinkResult, ValidationError,
};
