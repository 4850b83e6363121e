//! Static description of one template engine's injection surface (§3 data
//! model, §9 redesign flag "closed call enum"). A `PluginDescriptor` is pure
//! data — no behaviour — built once by a concrete engine module (e.g.
//! `crate::plugins::javascript::nunjucks`) and handed to `PluginRegistry`.

use crate::context::ContextDescriptor;

/// The six primitives a capability action can delegate to. Replaces the
/// original's `getattr(self, call_name)` string dispatch: every action now
/// names one of a fixed, exhaustively-matched set of methods on
/// `PluginRuntime` (§9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Inject,
    Render,
    Evaluate,
    Execute,
    EvaluateBlind,
    ExecuteBlind,
}

/// How the header/trailer arithmetic check combines its two random
/// integers: `Add` sums them, `Cat` concatenates their decimal digits,
/// `Other` means the engine doesn't support framed extraction at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderType {
    Add,
    Cat,
    Other,
}

impl HeaderType {
    pub fn expected(&self, rand: [u32; 2]) -> String {
        match self {
            HeaderType::Add => (rand[0] + rand[1]).to_string(),
            HeaderType::Cat => format!("{}{}", rand[0], rand[1]),
            HeaderType::Other => String::new(),
        }
    }
}

/// The `render` capability: the framed execution probe every other
/// capability falls back onto for its wrapping (§4.C).
#[derive(Debug, Clone)]
pub struct RenderAction {
    pub render: String,
    pub header: Option<String>,
    pub trailer: Option<String>,
    pub test_render: String,
    pub test_render_expected: String,
}

#[derive(Debug, Clone)]
pub struct EvaluateAction {
    pub call: Call,
    pub evaluate: String,
    pub test_os: Option<String>,
    pub test_os_expected: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExecuteAction {
    pub call: Call,
    pub execute: String,
    pub test_cmd: Option<String>,
    pub test_cmd_expected: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EvaluateBlindAction {
    pub call: Call,
    pub evaluate_blind: String,
}

#[derive(Debug, Clone)]
pub struct ExecuteBlindAction {
    pub call: Call,
    pub execute_blind: String,
}

#[derive(Debug, Clone)]
pub struct ReadAction {
    pub call: Call,
    pub read: String,
}

#[derive(Debug, Clone)]
pub struct WriteAction {
    pub call: Call,
    pub write: String,
    pub truncate: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Md5Action {
    pub call: Call,
    pub md5: String,
}

#[derive(Debug, Clone)]
pub struct BlindAction {
    pub call: Call,
    pub test_bool_true: String,
    pub test_bool_false: String,
}

/// `bind_shell`/`reverse_shell`: one template per shell flavour tried in
/// order until one of them is accepted by the target (§4.E).
#[derive(Debug, Clone)]
pub struct ShellAction {
    pub call: Call,
    pub templates: Vec<String>,
}

/// All capabilities a plugin may declare. None are required; a descriptor
/// with only `render` set can still be detected against, just not
/// escalated.
#[derive(Debug, Clone, Default)]
pub struct ActionTable {
    pub render: Option<RenderAction>,
    pub evaluate: Option<EvaluateAction>,
    pub execute: Option<ExecuteAction>,
    pub evaluate_blind: Option<EvaluateBlindAction>,
    pub execute_blind: Option<ExecuteBlindAction>,
    pub read: Option<ReadAction>,
    pub write: Option<WriteAction>,
    pub md5: Option<Md5Action>,
    pub blind: Option<BlindAction>,
    pub bind_shell: Option<ShellAction>,
    pub reverse_shell: Option<ShellAction>,
}

/// Free-text metadata surfaced by reporting, never consulted by detection
/// logic (§3).
#[derive(Debug, Clone, Default)]
pub struct PluginInfo {
    pub description: String,
    pub authors: Vec<String>,
    pub references: Vec<String>,
    pub engines: Vec<String>,
}

/// A (major, minor, patch) triple used for the plugin-pack version gate
/// (§4.H).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version(pub u32, pub u32, pub u32);

/// One template engine's complete injection surface: its syntactic escape
/// contexts, its capability actions, and the metadata the registry uses to
/// order and gate it.
#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    pub language: String,
    pub name: String,
    pub priority: i32,
    pub header_type: HeaderType,
    pub actions: ActionTable,
    pub contexts: Vec<ContextDescriptor>,
    pub min_core_version: Version,
    pub info: PluginInfo,
}

impl PluginDescriptor {
    pub fn new(language: impl Into<String>, name: impl Into<String>, priority: i32) -> Self {
        Self {
            language: language.into(),
            name: name.into(),
            priority,
            header_type: HeaderType::Other,
            actions: ActionTable::default(),
            contexts: Vec::new(),
            min_core_version: Version(1, 0, 0),
            info: PluginInfo::default(),
        }
    }
}
