//! Session context and payload enrichment
//!
//! The context carries everything a request payload picks up on its way out:
//! opaque device metadata from the host, the identifiers the init response
//! established, and an optional advertising identifier supplied by a host
//! capability. It is constructed once, owned by the dispatcher, and passed
//! explicitly; there is no ambient global.

use serde_json::{Map, Value};

use crate::envelope::{now_ms, RequestKind};
use crate::keys;

// ----------------------------------------------------------------------------
// Host Capabilities
// ----------------------------------------------------------------------------

/// Supplier of opaque device key/value metadata merged into every payload.
///
/// The core never interprets these values; hosts decide what to expose
/// (hardware id, brand, model, screen metrics, connectivity, ...).
pub trait MetadataProvider: Send + Sync {
    fn device_metadata(&self) -> Map<String, Value>;
}

/// Fixed metadata captured once at startup
#[derive(Debug, Clone, Default)]
pub struct StaticMetadata {
    values: Map<String, Value>,
}

impl StaticMetadata {
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// Empty metadata, for hosts with nothing to report
    pub fn none() -> Self {
        Self::default()
    }
}

impl MetadataProvider for StaticMetadata {
    fn device_metadata(&self) -> Map<String, Value> {
        self.values.clone()
    }
}

/// An advertising identifier with its tracking-limited flag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisingId {
    pub id: String,
    pub limit_ad_tracking: bool,
}

/// Optional host capability supplying an advertising identifier.
///
/// Absent on hosts without the underlying service; the core only sees the
/// resulting payload enrichment.
pub trait AdvertisingIdProvider: Send + Sync {
    fn fetch(&self) -> Option<AdvertisingId>;
}

/// A fetched advertising id with its fetch time, for staleness checks
#[derive(Debug, Clone)]
struct PrefetchedAdId {
    value: AdvertisingId,
    fetched_at: u64,
}

/// How long a prefetched advertising id stays usable before a refresh
const AD_ID_MAX_AGE_MS: u64 = 30_000;

// ----------------------------------------------------------------------------
// Session Context
// ----------------------------------------------------------------------------

/// Mutable session-scoped state owned by the dispatcher
pub struct SessionContext {
    metadata: Box<dyn MetadataProvider>,
    ad_id_provider: Option<Box<dyn AdvertisingIdProvider>>,
    prefetched_ad_id: Option<PrefetchedAdId>,
    session_id: Option<String>,
    identity_id: Option<String>,
    device_fingerprint_id: Option<String>,
    /// Referring link data from the most recent init response
    referring_data: Option<Value>,
    /// Cached terminal outcome of the last successful init, replayed to
    /// callers who ask to initialize an already-initialized session
    last_init_response: Option<Value>,
}

impl SessionContext {
    pub fn new(metadata: Box<dyn MetadataProvider>) -> Self {
        Self {
            metadata,
            ad_id_provider: None,
            prefetched_ad_id: None,
            session_id: None,
            identity_id: None,
            device_fingerprint_id: None,
            referring_data: None,
            last_init_response: None,
        }
    }

    pub fn with_advertising_id_provider(
        mut self,
        provider: Box<dyn AdvertisingIdProvider>,
    ) -> Self {
        self.ad_id_provider = Some(provider);
        self
    }

    /// Which operation starts the next session: install on a device the
    /// service has never fingerprinted, open afterwards.
    pub fn init_kind(&self) -> RequestKind {
        if self.device_fingerprint_id.is_none() {
            RequestKind::RegisterInstall
        } else {
            RequestKind::RegisterOpen
        }
    }

    /// Merge device metadata, session identifiers and the advertising id
    /// into an outgoing payload. Blank metadata values are omitted.
    pub fn enrich(&mut self, kind: RequestKind, payload: &mut Value) {
        let Some(obj) = payload.as_object_mut() else {
            return;
        };

        for (key, value) in self.metadata.device_metadata() {
            if value.as_str().is_some_and(str::is_empty) {
                continue;
            }
            obj.entry(key).or_insert(value);
        }

        if let Some(ad_id) = self.advertising_id() {
            obj.insert(keys::ADVERTISING_ID.to_string(), Value::from(ad_id.id));
            obj.insert(keys::LAT_VAL.to_string(), Value::from(ad_id.limit_ad_tracking));
        }

        if let Some(fingerprint) = &self.device_fingerprint_id {
            obj.insert(
                keys::DEVICE_FINGERPRINT_ID.to_string(),
                Value::from(fingerprint.clone()),
            );
        }
        if let Some(identity) = &self.identity_id {
            obj.insert(keys::IDENTITY_ID.to_string(), Value::from(identity.clone()));
        }
        if kind.requires_session() || kind.is_session_close() {
            if let Some(session) = &self.session_id {
                obj.insert(keys::SESSION_ID.to_string(), Value::from(session.clone()));
            }
        }
    }

    /// The current advertising id, refreshed through the provider when the
    /// prefetched value has gone stale
    fn advertising_id(&mut self) -> Option<AdvertisingId> {
        let provider = self.ad_id_provider.as_ref()?;
        let now = now_ms();

        let stale = match &self.prefetched_ad_id {
            Some(prefetched) => now.saturating_sub(prefetched.fetched_at) > AD_ID_MAX_AGE_MS,
            None => true,
        };
        if stale {
            self.prefetched_ad_id = provider.fetch().map(|value| PrefetchedAdId {
                value,
                fetched_at: now,
            });
        }
        self.prefetched_ad_id.as_ref().map(|p| p.value.clone())
    }

    /// Absorb identifiers from a successful session-init response
    pub fn absorb_init_response(&mut self, response: &Value) {
        if let Some(session_id) = response.get(keys::SESSION_ID).and_then(Value::as_str) {
            self.session_id = Some(session_id.to_string());
        }
        if let Some(identity_id) = response.get(keys::IDENTITY_ID).and_then(Value::as_str) {
            self.identity_id = Some(identity_id.to_string());
        }
        if let Some(fingerprint) = response
            .get(keys::DEVICE_FINGERPRINT_ID)
            .and_then(Value::as_str)
        {
            self.device_fingerprint_id = Some(fingerprint.to_string());
        }
        if let Some(data) = response.get(keys::DATA) {
            self.referring_data = Some(data.clone());
        }
        self.last_init_response = Some(response.clone());
    }

    /// Forget the session id when the session closes
    pub fn clear_session(&mut self) {
        self.session_id = None;
        self.last_init_response = None;
    }

    /// Forget the developer identity after a logout
    pub fn clear_identity(&mut self) {
        self.identity_id = None;
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn identity_id(&self) -> Option<&str> {
        self.identity_id.as_deref()
    }

    pub fn referring_data(&self) -> Option<&Value> {
        self.referring_data.as_ref()
    }

    pub fn last_init_response(&self) -> Option<&Value> {
        self.last_init_response.as_ref()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata() -> Box<dyn MetadataProvider> {
        let mut values = Map::new();
        values.insert("brand".to_string(), Value::from("acme"));
        values.insert("model".to_string(), Value::from(""));
        values.insert("os".to_string(), Value::from("linux"));
        Box::new(StaticMetadata::new(values))
    }

    struct FixedAdId;

    impl AdvertisingIdProvider for FixedAdId {
        fn fetch(&self) -> Option<AdvertisingId> {
            Some(AdvertisingId {
                id: "ad-123".to_string(),
                limit_ad_tracking: false,
            })
        }
    }

    #[test]
    fn test_enrich_merges_metadata_and_skips_blanks() {
        let mut context = SessionContext::new(metadata());
        let mut payload = json!({ "event": "signup" });
        context.enrich(RequestKind::CompletedAction, &mut payload);

        assert_eq!(payload["brand"], "acme");
        assert_eq!(payload["os"], "linux");
        assert!(payload.get("model").is_none());
        assert_eq!(payload["event"], "signup");
    }

    #[test]
    fn test_enrich_does_not_override_caller_fields() {
        let mut context = SessionContext::new(metadata());
        let mut payload = json!({ "brand": "caller-says" });
        context.enrich(RequestKind::CompletedAction, &mut payload);
        assert_eq!(payload["brand"], "caller-says");
    }

    #[test]
    fn test_init_kind_install_then_open() {
        let mut context = SessionContext::new(Box::new(StaticMetadata::none()));
        assert_eq!(context.init_kind(), RequestKind::RegisterInstall);

        context.absorb_init_response(&json!({
            "session_id": "s1",
            "device_fingerprint_id": "fp1",
        }));
        assert_eq!(context.init_kind(), RequestKind::RegisterOpen);
    }

    #[test]
    fn test_absorb_and_clear_session() {
        let mut context = SessionContext::new(Box::new(StaticMetadata::none()));
        context.absorb_init_response(&json!({
            "session_id": "s1",
            "identity_id": "i1",
            "data": { "+clicked_link": true, "+is_first_session": false },
        }));
        assert_eq!(context.session_id(), Some("s1"));
        assert_eq!(context.identity_id(), Some("i1"));
        assert!(context.referring_data().is_some());

        let mut payload = json!({});
        context.enrich(RequestKind::GetCreditHistory, &mut payload);
        assert_eq!(payload["session_id"], "s1");
        assert_eq!(payload["identity_id"], "i1");

        context.clear_session();
        assert!(context.session_id().is_none());
        assert!(context.last_init_response().is_none());
    }

    #[test]
    fn test_advertising_id_enrichment() {
        let mut context =
            SessionContext::new(Box::new(StaticMetadata::none()))
                .with_advertising_id_provider(Box::new(FixedAdId));

        let mut payload = json!({});
        context.enrich(RequestKind::RegisterInstall, &mut payload);
        assert_eq!(payload["advertising_id"], "ad-123");
        assert_eq!(payload["lat_val"], false);
    }

    #[test]
    fn test_no_session_id_on_init_payloads() {
        let mut context = SessionContext::new(Box::new(StaticMetadata::none()));
        context.absorb_init_response(&json!({ "session_id": "s1" }));

        let mut payload = json!({});
        context.enrich(RequestKind::RegisterOpen, &mut payload);
        assert!(payload.get("session_id").is_none());
    }
}
