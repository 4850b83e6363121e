//! End-to-end detection/escalation tests against an in-process `LocalChannel`
//! stand-in, the way the teacher's integration tests drove its app through a
//! mock HTTP layer rather than a real socket.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tplstrike::context::ForceLevel;
use tplstrike::plugin::{HeaderType, PluginDescriptor, PluginRuntime, RenderAction};
use tplstrike::session::{Args, Channel, ChannelError, DetectionEvent, SessionData, SessionValue};

/// A channel whose response is computed from the submitted injection by a
/// plain closure, standing in for a real Nunjucks/Jinja2/Twig target.
struct ScriptedChannel {
    respond: Box<dyn Fn(&str) -> String + Send + Sync>,
    args: Args,
    data: Mutex<SessionData>,
    events: Mutex<Vec<DetectionEvent>>,
}

impl ScriptedChannel {
    fn new(args: Args, respond: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            args,
            data: Mutex::new(SessionData::new()),
            events: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Channel for ScriptedChannel {
    async fn req(&self, injection: &str) -> Result<String, ChannelError> {
        Ok((self.respond)(injection))
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

fn toy_descriptor() -> PluginDescriptor {
    let mut d = PluginDescriptor::new("toy", "echo", 1);
    d.header_type = HeaderType::Add;
    d.actions.render = Some(RenderAction {
        render: "{code}".to_string(),
        header: Some("H{header[0]}+{header[1]}H".to_string()),
        trailer: Some("T{trailer[0]}+{trailer[1]}T".to_string()),
        test_render: "9*9".to_string(),
        test_render_expected: "81".to_string(),
    });
    d.contexts = vec![Default::default()];
    d
}

#[tokio::test]
async fn detect_render_confirms_against_scripted_engine() {
    let args = Args {
        technique: "R".to_string(),
        ..Args::default()
    };
    let channel = Arc::new(ScriptedChannel::new(args, |injection: &str| {
        let re_h = regex::Regex::new(r"H(\d+)\+(\d+)H").unwrap();
        let re_t = regex::Regex::new(r"T(\d+)\+(\d+)T").unwrap();
        let h = re_h.captures(injection).map(|c| c[1].parse::<u32>().unwrap() + c[2].parse::<u32>().unwrap());
        let t = re_t.captures(injection).map(|c| c[1].parse::<u32>().unwrap() + c[2].parse::<u32>().unwrap());
        let body = if injection.contains("9*9") { "81" } else { "0" };
        match (h, t) {
            (Some(h), Some(t)) => format!("{h}{body}{t}"),
            _ => String::new(),
        }
    }));
    let descriptor = Arc::new(toy_descriptor());
    let runtime = PluginRuntime::new(descriptor, channel.clone());

    let detected = runtime.detect().await.unwrap();
    assert!(detected);
    assert!(channel.get("detected").unwrap().as_bool().unwrap());
    assert_eq!(channel.events().len(), 1);
}

#[tokio::test]
async fn detect_render_reports_no_match_against_inert_target() {
    let args = Args {
        technique: "R".to_string(),
        ..Args::default()
    };
    let channel = Arc::new(ScriptedChannel::new(args, |_: &str| "<html>static page</html>".to_string()));
    let descriptor = Arc::new(toy_descriptor());
    let runtime = PluginRuntime::new(descriptor, channel.clone());

    let detected = runtime.detect().await.unwrap();
    assert!(!detected);
    assert!(channel.get("detected").is_none());
}

#[tokio::test]
async fn detect_unreliable_render_flags_but_does_not_confirm() {
    let args = Args {
        technique: "R".to_string(),
        ..Args::default()
    };
    // Framing markers are stripped but the expected fragment still leaks
    // into the body: a real echo, but not one that is actionable.
    let channel = Arc::new(ScriptedChannel::new(args, |injection: &str| {
        if injection.contains("9*9") {
            "...garbage 81 garbage...".to_string()
        } else {
            String::new()
        }
    }));
    let descriptor = Arc::new(toy_descriptor());
    let runtime = PluginRuntime::new(descriptor, channel.clone());

    let detected = runtime.detect().await.unwrap();
    assert!(!detected, "an unreliable echo must not confirm detection");
    assert!(channel.get("detected").is_none());
    assert!(channel.get("engine").is_none());
    assert_eq!(
        channel.get("unreliable_render").and_then(|v| v.as_str().map(str::to_string)),
        Some("{code}".to_string())
    );
    assert_eq!(
        channel.get("unreliable").and_then(|v| v.as_str().map(str::to_string)),
        Some("echo".to_string())
    );
    assert!(channel.events().is_empty());
}

#[tokio::test]
async fn force_level_restricts_context_enumeration_during_detection() {
    let args = Args {
        technique: "R".to_string(),
        force_level: ForceLevel {
            context_level: Some(9),
            closure_level: None,
        },
        ..Args::default()
    };
    let channel = Arc::new(ScriptedChannel::new(args, |injection: &str| {
        let re_h = regex::Regex::new(r"H(\d+)\+(\d+)H").unwrap();
        let re_t = regex::Regex::new(r"T(\d+)\+(\d+)T").unwrap();
        let h = re_h.captures(injection).map(|c| c[1].parse::<u32>().unwrap() + c[2].parse::<u32>().unwrap());
        let t = re_t.captures(injection).map(|c| c[1].parse::<u32>().unwrap() + c[2].parse::<u32>().unwrap());
        let body = if injection.contains("9*9") { "81" } else { "0" };
        match (h, t) {
            (Some(h), Some(t)) => format!("{h}{body}{t}"),
            _ => String::new(),
        }
    }));
    let descriptor = Arc::new(toy_descriptor());
    let runtime = PluginRuntime::new(descriptor, channel.clone());

    let detected = runtime.detect().await.unwrap();
    assert!(!detected, "the only declared context is level 0, forcing level 9 should exclude it");
}

#[tokio::test]
async fn evaluate_against_nunjucks_descriptor_returns_scripted_body() {
    let args = Args::default();
    let seen = Arc::new(Mutex::new(Vec::<String>::new()));
    let seen_clone = seen.clone();
    let channel = Arc::new(ScriptedChannel::new(args, move |injection: &str| {
        seen_clone.lock().unwrap().push(injection.to_string());
        "linux".to_string()
    }));
    let descriptor = Arc::new(tplstrike::plugins::javascript::nunjucks());
    let runtime = PluginRuntime::new(descriptor, channel);

    let result = runtime.evaluate("1+1").await.unwrap();
    assert_eq!(result.as_deref(), Some("linux"));
    assert!(seen.lock().unwrap()[0].contains("range.constructor"));
}
