//! Plugin descriptors and the runtime that drives them (§4.C–§4.F, §9).

pub mod descriptor;
pub mod runtime;
pub mod template;

pub use descriptor::{
    ActionTable, BlindAction, Call, EvaluateAction, EvaluateBlindAction, ExecuteAction, ExecuteBlindAction,
    HeaderType, Md5Action, PluginDescriptor, PluginInfo, ReadAction, RenderAction, ShellAction, Version,
    WriteAction,
};
pub use runtime::{Framing, PluginRuntime, RenderKwargs, RenderOutcome};
