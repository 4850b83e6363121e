//! Thin CLI surface (AMBIENT STACK: CLI). Contains no probing logic —
//! it parses flags into `session::Args` plus the handful of run-level
//! knobs (`url`, `method`, `engine`, escalation triggers) the driver in
//! `main` consumes, the same way the original CLI was a dumb shim over
//! the core's own contracts.

use clap::{Parser, ValueEnum};

use crate::channel::Method;
use crate::context::ForceLevel;
use crate::session::Args;
use crate::timing::{DEFAULT_BLIND_DELAY_SECS, DEFAULT_VERIFY_DELAY_SECS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HttpMethod {
    Get,
    Post,
}

impl From<HttpMethod> for Method {
    fn from(m: HttpMethod) -> Self {
        match m {
            HttpMethod::Get => Method::Get,
            HttpMethod::Post => Method::Post,
        }
    }
}

/// Probe `url` (containing a literal `{inject}` placeholder) for server-side
/// template injection, fingerprint the rendering engine, and optionally
/// escalate a confirmed injection into code evaluation, command execution,
/// file transfer, or a shell.
#[derive(Debug, Parser)]
#[command(name = "tplstrike", version)]
pub struct Cli {
    /// Target URL; must contain a literal `{inject}` placeholder.
    pub url: String,

    /// HTTP method used to submit each probe.
    #[arg(long, value_enum, default_value = "get")]
    pub method: HttpMethod,

    /// Detection technique(s) to run: "R" (render), "T" (time-based blind)
    /// or "RT" (both).
    #[arg(long, default_value = "RT")]
    pub technique: String,

    /// Aggressiveness level, 1-5.
    #[arg(long, default_value_t = 1)]
    pub level: u8,

    /// Force a specific context level, optionally with a closure level:
    /// "context[:closure]". Bypasses the normal level-threshold walk.
    #[arg(long, value_name = "context[:closure]")]
    pub force_level: Option<String>,

    /// Re-run detection even if a plugin already recorded a prior hit.
    #[arg(long)]
    pub force_overwrite: bool,

    /// Seconds a blind probe must delay by to count as a hit.
    #[arg(long, default_value_t = DEFAULT_BLIND_DELAY_SECS)]
    pub time_based_blind_delay: u64,

    /// Seconds the confirmation re-check waits before accepting a blind hit.
    #[arg(long, default_value_t = DEFAULT_VERIFY_DELAY_SECS)]
    pub time_based_verify_blind_delay: u64,

    /// Restrict the registry to one hosting language (e.g. "javascript").
    #[arg(long)]
    pub engine: Option<String>,

    /// After a confirmed detection, fingerprint the target OS.
    #[arg(long)]
    pub os_shell: bool,

    /// After a confirmed detection, spawn a bind shell on this port.
    #[arg(long)]
    pub bind_shell: Option<u16>,

    /// After a confirmed detection, spawn a reverse shell to "host:port".
    #[arg(long)]
    pub reverse_shell: Option<String>,
}

impl Cli {
    pub fn force_level(&self) -> anyhow::Result<ForceLevel> {
        let Some(raw) = &self.force_level else {
            return Ok(ForceLevel::default());
        };
        let mut parts = raw.splitn(2, ':');
        let context_level = parts
            .next()
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<u8>())
            .transpose()
            .map_err(|_| anyhow::anyhow!("--force-level context component must be an integer"))?;
        let closure_level = parts
            .next()
            .map(|s| s.parse::<u8>())
            .transpose()
            .map_err(|_| anyhow::anyhow!("--force-level closure component must be an integer"))?;
        Ok(ForceLevel {
            context_level,
            closure_level,
        })
    }

    pub fn reverse_shell_target(&self) -> anyhow::Result<Option<(String, u16)>> {
        let Some(raw) = &self.reverse_shell else {
            return Ok(None);
        };
        let (host, port) = raw
            .rsplit_once(':')
            .ok_or_else(|| anyhow::anyhow!("--reverse-shell must be \"host:port\""))?;
        let port: u16 = port.parse().map_err(|_| anyhow::anyhow!("--reverse-shell port must be an integer"))?;
        Ok(Some((host.to_string(), port)))
    }

    pub fn to_args(&self) -> anyhow::Result<Args> {
        Ok(Args {
            technique: self.technique.to_ascii_uppercase(),
            level: self.level,
            force_level: self.force_level()?,
            force_overwrite: self.force_overwrite,
            time_based_blind_delay: self.time_based_blind_delay,
            time_based_verify_blind_delay: self.time_based_verify_blind_delay,
        })
    }
}
