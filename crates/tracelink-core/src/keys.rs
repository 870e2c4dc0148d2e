//! JSON key vocabulary shared by request payloads and responses

// Identity and session bookkeeping
pub const IDENTITY_ID: &str = "identity_id";
pub const IDENTITY: &str = "identity";
pub const DEVICE_FINGERPRINT_ID: &str = "device_fingerprint_id";
pub const SESSION_ID: &str = "session_id";
pub const LINK_CLICK_ID: &str = "link_click_id";

// Rewards and referral codes
pub const BUCKET: &str = "bucket";
pub const DEFAULT_BUCKET: &str = "default";
pub const AMOUNT: &str = "amount";
pub const PREFIX: &str = "prefix";
pub const EXPIRATION: &str = "expiration";
pub const REFERRAL_CODE: &str = "referral_code";
pub const CALCULATION_TYPE: &str = "calculation_type";
pub const LOCATION: &str = "location";

// Events
pub const EVENT: &str = "event";
pub const METADATA: &str = "metadata";

// Link creation
pub const TAGS: &str = "tags";
pub const ALIAS: &str = "alias";
pub const LINK_TYPE: &str = "type";
pub const DURATION: &str = "duration";
pub const CHANNEL: &str = "channel";
pub const FEATURE: &str = "feature";
pub const STAGE: &str = "stage";
pub const DATA: &str = "data";

// Device params merged into outgoing payloads
pub const OS: &str = "os";
pub const OS_VERSION: &str = "os_version";
pub const HARDWARE_ID: &str = "hardware_id";
pub const IS_HARDWARE_ID_REAL: &str = "is_hardware_id_real";
pub const APP_VERSION: &str = "app_version";
pub const BRAND: &str = "brand";
pub const MODEL: &str = "model";
pub const SCREEN_DPI: &str = "screen_dpi";
pub const SCREEN_HEIGHT: &str = "screen_height";
pub const SCREEN_WIDTH: &str = "screen_width";
pub const WIFI: &str = "wifi";
pub const ADVERTISING_ID: &str = "advertising_id";
pub const LAT_VAL: &str = "lat_val";

// Request envelope extras
pub const APP_KEY: &str = "app_key";
pub const RETRY_NUMBER: &str = "retry_number";
