//! Core library for the SSTI detection and exploitation engine. Wires
//! together the session/channel facade, the plugin descriptor/runtime
//! layer, the priority-ordered registry and the ambient config/telemetry
//! stack. Deliberately avoids any dependency beyond what the detection
//! protocol itself needs — there is no inbound request path here, only an
//! outbound one (`channel::HttpChannel`) driven by `main`.

pub mod channel;
pub mod cli;
pub mod config;
pub mod context;
pub mod plugin;
pub mod plugins;
pub mod registry;
pub mod session;
pub mod telemetry;
pub mod timing;
pub mod util;

pub use config::AppConfig;
pub use session::{Args, Channel, ChannelError, SessionValue};
