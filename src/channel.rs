//! The production `Channel`: submits an injection by substituting it into
//! a `{inject}` placeholder inside a target URL and POSTs/GETs it with a
//! `reqwest::Client`, the way the teacher's outbound HTTP plugin builds
//! its client and handles transport failure.

use std::sync::Mutex;
use std::time::Duration;

use crate::session::{Args, Channel, ChannelError, DetectionEvent, SessionData, SessionValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// Everything needed to reach one target: the URL template (containing a
/// literal `{inject}` placeholder), the HTTP method, and the timeout
/// budget for each request.
pub struct HttpChannel {
    client: reqwest::Client,
    url_template: String,
    method: Method,
    args: Args,
    data: Mutex<SessionData>,
    events: Mutex<Vec<DetectionEvent>>,
}

impl HttpChannel {
    pub fn new(url_template: String, method: Method, timeout: Duration, args: Args) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url_template,
            method,
            args,
            data: Mutex::new(SessionData::new()),
            events: Mutex::new(Vec::new()),
        })
    }

    fn build_url(&self, injection: &str) -> String {
        let encoded = urlencoding_light(injection);
        self.url_template.replace("{inject}", &encoded)
    }
}

/// Minimal percent-encoding for the query/path segment the injection
/// lands in. Only the characters that would otherwise split the URL or
/// get silently stripped by an intermediary are escaped; the payload
/// itself must remain recognisable to the target's parser.
fn urlencoding_light(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            b' ' => out.push_str("%20"),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

#[async_trait::async_trait]
impl Channel for HttpChannel {
    async fn req(&self, injection: &str) -> Result<String, ChannelError> {
        let url = self.build_url(injection);
        let request = match self.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        };
        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                ChannelError::Timeout
            } else {
                ChannelError::Http(err)
            }
        })?;
        let text = response.text().await.map_err(ChannelError::Http)?;
        Ok(text)
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
