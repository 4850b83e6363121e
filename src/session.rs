//! Session/Channel facade (§4.G): the key/value store of discovered facts
//! that lives alongside one HTTP channel, the user-supplied run arguments,
//! and the detection notifier the driver observes.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::context::ForceLevel;

/// A value stored under one of the recognised session-data keys (§3). Most
/// keys are booleans (capability/detection flags); a handful carry the
/// winning context/framing templates as strings.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionValue {
    Bool(bool),
    Str(String),
}

impl SessionValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SessionValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SessionValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl From<bool> for SessionValue {
    fn from(b: bool) -> Self {
        SessionValue::Bool(b)
    }
}

impl From<String> for SessionValue {
    fn from(s: String) -> Self {
        SessionValue::Str(s)
    }
}

impl From<&str> for SessionValue {
    fn from(s: &str) -> Self {
        SessionValue::Str(s.to_string())
    }
}

/// Plain key/value mapping backing `channel.data`. Invariant enforcement
/// (§3 invariants i–iv) is the detection state machine's job, not this
/// facade's — this type is intentionally a dumb store.
#[derive(Debug, Default)]
pub struct SessionData(HashMap<String, SessionValue>);

impl SessionData {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn get(&self, key: &str) -> Option<SessionValue> {
        self.0.get(key).cloned()
    }

    pub fn set(&mut self, key: &str, value: SessionValue) {
        self.0.insert(key.to_string(), value);
    }

    pub fn delete(&mut self, key: &str) {
        self.0.remove(key);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }
}

/// User-supplied run arguments (§4.G): which techniques to run, the
/// aggressiveness level, an optional forced level, the overwrite guard and
/// the two timing budgets.
#[derive(Debug, Clone)]
pub struct Args {
    pub technique: String,
    pub level: u8,
    pub force_level: ForceLevel,
    pub force_overwrite: bool,
    pub time_based_blind_delay: u64,
    pub time_based_verify_blind_delay: u64,
}

impl Args {
    pub fn wants_render(&self) -> bool {
        self.technique.contains('R')
    }

    pub fn wants_blind(&self) -> bool {
        self.technique.contains('T')
    }
}

impl Default for Args {
    fn default() -> Self {
        Self {
            technique: "RT".to_string(),
            level: 1,
            force_level: ForceLevel::default(),
            force_overwrite: false,
            time_based_blind_delay: crate::timing::DEFAULT_BLIND_DELAY_SECS,
            time_based_verify_blind_delay: crate::timing::DEFAULT_VERIFY_DELAY_SECS,
        }
    }
}

/// A detection or escalation event the channel records for the driver/
/// reporter to consume.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DetectionEvent {
    pub kind: String,
    pub detail: serde_json::Value,
}

/// Error surfaced by a channel's `req` — the one boundary in this layer
/// that is allowed to fail loudly (§7: "no error aborts the engine outside
/// of a missing HTTP channel response").
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("channel request timed out")]
    Timeout,
}

/// The contract the detection/escalation core consumes (§6): submit an
/// injection string and get the response body back, read/write session
/// facts, and record detection events.
#[async_trait::async_trait]
pub trait Channel: Send + Sync {
    /// Submit `injection` to the target and return the raw response body.
    async fn req(&self, injection: &str) -> Result<String, ChannelError>;

    fn args(&self) -> &Args;

    fn get(&self, key: &str) -> Option<SessionValue>;
    fn set(&self, key: &str, value: SessionValue);
    fn delete(&self, key: &str);

    fn detected(&self, kind: &str, detail: serde_json::Value);

    /// Snapshot of every event recorded so far via `detected`.
    fn events(&self) -> Vec<DetectionEvent>;

    fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(|s| s.to_string()))
    }

    fn set_bool(&self, key: &str, value: bool) {
        self.set(key, SessionValue::Bool(value));
    }

    fn set_str(&self, key: &str, value: String) {
        self.set(key, SessionValue::Str(value));
    }
}

/// A minimal in-process `Channel` used by tests and the enumerator bench:
/// holds session data and args, but has no real network path. Production
/// code uses `crate::channel::HttpChannel`.
pub struct LocalChannel {
    data: Mutex<SessionData>,
    args: Args,
    events: Mutex<Vec<DetectionEvent>>,
}

impl LocalChannel {
    pub fn new(args: Args) -> Self {
        Self {
            data: Mutex::new(SessionData::new()),
            args,
            events: Mutex::new(Vec::new()),
        }
    }

}

#[async_trait::async_trait]
impl Channel for LocalChannel {
    async fn req(&self, _injection: &str) -> Result<String, ChannelError> {
        Ok(String::new())
    }

    fn args(&self) -> &Args {
        &self.args
    }

    fn get(&self, key: &str) -> Option<SessionValue> {
        self.data.lock().unwrap().get(key)
    }

    fn set(&self, key: &str, value: SessionValue) {
        self.data.lock().unwrap().set(key, value);
    }

    fn delete(&self, key: &str) {
        self.data.lock().unwrap().delete(key);
    }

    fn detected(&self, kind: &str, detail: serde_json::Value) {
        self.events.lock().unwrap().push(DetectionEvent {
            kind: kind.to_string(),
            detail,
        });
    }

    fn events(&self) -> Vec<DetectionEvent> {
        self.events.lock().unwrap().clone()
    }
}
