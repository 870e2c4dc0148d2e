//! Public client handle and builder
//!
//! [`TracelinkBuilder`] assembles the queue, session context and executor,
//! spawns the dispatcher task, and hands back a cloneable [`Tracelink`]
//! handle exposing the typed request API.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use tracelink_core::errors::{TracelinkError, TracelinkResult};
use tracelink_core::{
    keys, AdvertisingIdProvider, MemoryRecordStore, MetadataProvider, PendingQueue, RecordStore,
    RequestEnvelope, RequestKind, SessionContext, SqliteRecordStore, StaticMetadata,
    TracelinkConfig,
};

use crate::dispatcher::{DispatchStats, Dispatcher, DispatcherCommand};
use crate::executor::{HttpNetworkExecutor, NetworkExecutor};
use crate::lifecycle::LifecycleGate;

/// Command channel depth; submissions are infrequent relative to dispatch
const COMMAND_BUFFER_SIZE: usize = 32;

// ----------------------------------------------------------------------------
// Link Properties
// ----------------------------------------------------------------------------

/// Parameters for short deep-link creation
#[derive(Debug, Clone, Default)]
pub struct LinkProperties {
    pub channel: Option<String>,
    pub feature: Option<String>,
    pub stage: Option<String>,
    pub alias: Option<String>,
    pub tags: Vec<String>,
    pub duration: Option<i64>,
    /// Deep-link data carried by the resulting link
    pub data: Option<Value>,
}

impl LinkProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn feature(mut self, feature: impl Into<String>) -> Self {
        self.feature = Some(feature.into());
        self
    }

    pub fn stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    fn into_payload(self) -> Value {
        let mut payload = Map::new();
        if let Some(channel) = self.channel {
            payload.insert(keys::CHANNEL.to_string(), Value::from(channel));
        }
        if let Some(feature) = self.feature {
            payload.insert(keys::FEATURE.to_string(), Value::from(feature));
        }
        if let Some(stage) = self.stage {
            payload.insert(keys::STAGE.to_string(), Value::from(stage));
        }
        if let Some(alias) = self.alias {
            payload.insert(keys::ALIAS.to_string(), Value::from(alias));
        }
        if !self.tags.is_empty() {
            payload.insert(keys::TAGS.to_string(), Value::from(self.tags));
        }
        if let Some(duration) = self.duration {
            payload.insert(keys::DURATION.to_string(), Value::from(duration));
        }
        if let Some(data) = self.data {
            payload.insert(keys::DATA.to_string(), data);
        }
        Value::Object(payload)
    }
}

// ----------------------------------------------------------------------------
// Builder
// ----------------------------------------------------------------------------

/// Builder assembling and starting the SDK
pub struct TracelinkBuilder {
    config: TracelinkConfig,
    metadata: Option<Box<dyn MetadataProvider>>,
    advertising_id: Option<Box<dyn AdvertisingIdProvider>>,
    executor: Option<Arc<dyn NetworkExecutor>>,
}

impl TracelinkBuilder {
    pub fn new(config: TracelinkConfig) -> Self {
        Self {
            config,
            metadata: None,
            advertising_id: None,
            executor: None,
        }
    }

    /// Supply the host's device metadata
    pub fn with_metadata_provider(mut self, provider: Box<dyn MetadataProvider>) -> Self {
        self.metadata = Some(provider);
        self
    }

    /// Supply the optional advertising-id capability
    pub fn with_advertising_id_provider(
        mut self,
        provider: Box<dyn AdvertisingIdProvider>,
    ) -> Self {
        self.advertising_id = Some(provider);
        self
    }

    /// Replace the default HTTP executor (custom transports, tests)
    pub fn with_executor(mut self, executor: Arc<dyn NetworkExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Validate the configuration, restore the durable queue, spawn the
    /// dispatcher task and return a client handle.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> TracelinkResult<Tracelink> {
        self.config
            .validate()
            .map_err(TracelinkError::config_error)?;

        let store: Box<dyn RecordStore> = match &self.config.queue.store_path {
            Some(path) => Box::new(SqliteRecordStore::open(path)?),
            None => Box::new(MemoryRecordStore::new()),
        };
        let mut queue = PendingQueue::new(store, &self.config.queue);
        let restored = queue.load_from_store()?;
        if restored > 0 {
            tracing::info!(restored, "restored pending requests from durable store");
        }

        let metadata = self
            .metadata
            .unwrap_or_else(|| Box::new(StaticMetadata::none()));
        let mut context = SessionContext::new(metadata);
        if let Some(provider) = self.advertising_id {
            context = context.with_advertising_id_provider(provider);
        }

        let executor = match self.executor {
            Some(executor) => executor,
            None => Arc::new(HttpNetworkExecutor::new(&self.config.network)?),
        };

        let (commands, receiver) = mpsc::channel(COMMAND_BUFFER_SIZE);
        let dispatcher = Dispatcher::new(self.config, queue, context, executor, receiver);
        tokio::spawn(dispatcher.run());

        Ok(Tracelink { commands })
    }
}

// ----------------------------------------------------------------------------
// Client Handle
// ----------------------------------------------------------------------------

/// Cloneable handle to a running SDK instance
#[derive(Debug, Clone)]
pub struct Tracelink {
    commands: mpsc::Sender<DispatcherCommand>,
}

impl Tracelink {
    /// Start building an SDK instance
    pub fn builder(config: TracelinkConfig) -> TracelinkBuilder {
        TracelinkBuilder::new(config)
    }

    async fn send(&self, command: DispatcherCommand) -> TracelinkResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| TracelinkError::shutdown("dispatcher stopped"))
    }

    async fn await_outcome(
        &self,
        receiver: oneshot::Receiver<tracelink_core::RequestOutcome>,
    ) -> TracelinkResult<Value> {
        receiver
            .await
            .map_err(|_| TracelinkError::shutdown("dispatcher stopped before completion"))?
    }

    /// Enqueue a request for the given operation.
    ///
    /// Payload shape failures are reported immediately; the request never
    /// enters the queue. Otherwise the future resolves with the terminal
    /// outcome once dispatch (including any retries) finishes.
    pub async fn submit(&self, kind: RequestKind, payload: Value) -> TracelinkResult<Value> {
        let (sender, receiver) = oneshot::channel();
        let envelope = RequestEnvelope::new(kind, payload)?.with_callback(sender);
        self.send(DispatcherCommand::Submit { envelope }).await?;
        self.await_outcome(receiver).await
    }

    /// Low-level enqueue for callers that build their own envelope and
    /// track its completion (and id) themselves
    pub async fn submit_envelope(&self, envelope: RequestEnvelope) -> TracelinkResult<()> {
        self.send(DispatcherCommand::Submit { envelope }).await
    }

    /// Like [`submit`](Self::submit) with a per-call network timeout
    pub async fn submit_with_timeout(
        &self,
        kind: RequestKind,
        payload: Value,
        timeout: std::time::Duration,
    ) -> TracelinkResult<Value> {
        let (sender, receiver) = oneshot::channel();
        let envelope = RequestEnvelope::new(kind, payload)?
            .with_timeout(timeout)
            .with_callback(sender);
        self.send(DispatcherCommand::Submit { envelope }).await?;
        self.await_outcome(receiver).await
    }

    // ------------------------------------------------------------------------
    // Session API
    // ------------------------------------------------------------------------

    /// Initialize a session, or attach to the attempt already in flight
    pub async fn init_session(&self) -> TracelinkResult<Value> {
        let (sender, receiver) = oneshot::channel();
        self.send(DispatcherCommand::InitSession {
            waiter: Some(sender),
        })
        .await?;
        self.await_outcome(receiver).await
    }

    /// Close the current session
    pub async fn close_session(&self) -> TracelinkResult<Value> {
        let (sender, receiver) = oneshot::channel();
        self.send(DispatcherCommand::CloseSession {
            waiter: Some(sender),
        })
        .await?;
        self.await_outcome(receiver).await
    }

    /// Lifecycle handle for host foreground/background signals
    pub fn lifecycle(&self) -> LifecycleGate {
        LifecycleGate::new(self.commands.clone())
    }

    // ------------------------------------------------------------------------
    // Typed request API
    // ------------------------------------------------------------------------

    /// Report a completed user action
    pub async fn track_event(
        &self,
        event: impl Into<String>,
        metadata: Option<Value>,
    ) -> TracelinkResult<Value> {
        let mut payload = json!({});
        payload[keys::EVENT] = Value::from(event.into());
        if let Some(metadata) = metadata {
            payload[keys::METADATA] = metadata;
        }
        self.submit(RequestKind::CompletedAction, payload).await
    }

    /// Attach a developer identity to the current user
    pub async fn set_identity(&self, identity: impl Into<String>) -> TracelinkResult<Value> {
        let mut payload = json!({});
        payload[keys::IDENTITY] = Value::from(identity.into());
        self.submit(RequestKind::IdentifyUser, payload).await
    }

    /// Detach the developer identity
    pub async fn logout(&self) -> TracelinkResult<Value> {
        self.submit(RequestKind::Logout, json!({})).await
    }

    /// Create a short deep link
    pub async fn create_short_url(&self, link: LinkProperties) -> TracelinkResult<Value> {
        self.submit(RequestKind::GetUrl, link.into_payload()).await
    }

    /// Create a referral code worth `amount` credits
    pub async fn get_referral_code(
        &self,
        prefix: Option<&str>,
        amount: i64,
    ) -> TracelinkResult<Value> {
        let mut payload = json!({});
        payload[keys::AMOUNT] = Value::from(amount);
        if let Some(prefix) = prefix {
            payload[keys::PREFIX] = Value::from(prefix);
        }
        self.submit(RequestKind::GetReferralCode, payload).await
    }

    /// Check a referral code without applying it
    pub async fn validate_referral_code(&self, code: impl Into<String>) -> TracelinkResult<Value> {
        let mut payload = json!({});
        payload[keys::REFERRAL_CODE] = Value::from(code.into());
        self.submit(RequestKind::ValidateReferralCode, payload).await
    }

    /// Apply a referral code to the current user
    pub async fn apply_referral_code(&self, code: impl Into<String>) -> TracelinkResult<Value> {
        let mut payload = json!({});
        payload[keys::REFERRAL_CODE] = Value::from(code.into());
        self.submit(RequestKind::ApplyReferralCode, payload).await
    }

    /// Fetch the credit transaction history
    pub async fn get_credit_history(&self) -> TracelinkResult<Value> {
        self.submit(RequestKind::GetCreditHistory, json!({})).await
    }

    /// Redeem reward credits from a bucket
    pub async fn redeem_rewards(
        &self,
        bucket: impl Into<String>,
        amount: i64,
    ) -> TracelinkResult<Value> {
        let mut payload = json!({});
        payload[keys::BUCKET] = Value::from(bucket.into());
        payload[keys::AMOUNT] = Value::from(amount);
        self.submit(RequestKind::RedeemRewards, payload).await
    }

    /// Look up the user's cross-platform identifiers
    pub async fn get_cross_platform_ids(&self) -> TracelinkResult<Value> {
        self.submit(RequestKind::GetCrossPlatformIds, json!({})).await
    }

    /// Look up the last attributed touch data
    pub async fn get_last_attributed_touch_data(&self) -> TracelinkResult<Value> {
        self.submit(RequestKind::GetLastAttributedTouchData, json!({}))
            .await
    }

    // ------------------------------------------------------------------------
    // Control
    // ------------------------------------------------------------------------

    /// Abandon a pending request before it dispatches
    pub async fn remove_request(&self, id: Uuid) -> TracelinkResult<()> {
        self.send(DispatcherCommand::Remove { id }).await
    }

    /// Cancel every pending request, reporting `reason` to each waiter
    pub async fn cancel_all(&self, reason: impl Into<String>) -> TracelinkResult<()> {
        self.send(DispatcherCommand::CancelAll {
            reason: reason.into(),
        })
        .await
    }

    /// Snapshot dispatch statistics
    pub async fn stats(&self) -> TracelinkResult<DispatchStats> {
        let (reply, receiver) = oneshot::channel();
        self.send(DispatcherCommand::QueryStats { reply }).await?;
        receiver
            .await
            .map_err(|_| TracelinkError::shutdown("dispatcher stopped"))
    }

    /// Cancel pending work and stop the dispatcher
    pub async fn shutdown(&self) -> TracelinkResult<()> {
        self.send(DispatcherCommand::Shutdown).await
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_properties_payload() {
        let payload = LinkProperties::new()
            .channel("email")
            .feature("onboarding")
            .tag("spring")
            .tag("promo")
            .data(json!({ "$deeplink_path": "open/item/1234" }))
            .into_payload();

        assert_eq!(payload["channel"], "email");
        assert_eq!(payload["feature"], "onboarding");
        assert_eq!(payload["tags"], json!(["spring", "promo"]));
        assert_eq!(payload["data"]["$deeplink_path"], "open/item/1234");
        assert!(payload.get("alias").is_none());
    }

    #[tokio::test]
    async fn test_submit_fails_fast_on_invalid_payload() {
        // No dispatcher is needed; validation rejects before any send.
        let (commands, _receiver) = mpsc::channel(1);
        let client = Tracelink { commands };

        let result = client
            .submit(RequestKind::IdentifyUser, json!({ "wrong": true }))
            .await;
        assert!(matches!(result, Err(TracelinkError::Validation(_))));
    }
}
