//! Plugin registry (§4.H): collects every engine descriptor a build was
//! compiled with, orders each language's plugins by priority, and gates
//! registration on the descriptor's declared minimum core version. Mirrors
//! the shape of a pipeline that orders and filters a fixed set of named
//! components, generalised from a single flat list to a `language -> [plugin]`
//! map plus a real semantic-version gate instead of a string allowlist.

use std::collections::HashMap;
use std::sync::Arc;

use crate::plugin::{PluginDescriptor, Version};

/// The core's own version, checked against each descriptor's
/// `min_core_version` at registration time.
pub const CORE_VERSION: Version = Version(1, 0, 0);

/// Why a descriptor was rejected at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationError {
    VersionTooOld { required: Version, core: Version },
    DuplicateName,
}

impl std::fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistrationError::VersionTooOld { required, core } => write!(
                f,
                "plugin requires core >= {}.{}.{}, running {}.{}.{}",
                required.0, required.1, required.2, core.0, core.1, core.2
            ),
            RegistrationError::DuplicateName => write!(f, "a plugin with this name is already registered"),
        }
    }
}

/// `language -> priority-ordered descriptors`, plus the bookkeeping of
/// which names were rejected and why (§4.H: "loaded" vs "failed" plugins).
#[derive(Default)]
pub struct PluginRegistry {
    loaded: HashMap<String, Vec<Arc<PluginDescriptor>>>,
    failed: Vec<(String, RegistrationError)>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one descriptor. Rejects it (moving it to `failed`) if the
    /// core version gate fails or a plugin under the same language/name
    /// pair is already loaded; otherwise inserts it in priority order
    /// (higher priority first, ties broken by registration order).
    pub fn register(&mut self, descriptor: PluginDescriptor) -> Result<(), RegistrationError> {
        if descriptor.min_core_version > CORE_VERSION {
            let err = RegistrationError::VersionTooOld {
                required: descriptor.min_core_version,
                core: CORE_VERSION,
            };
            self.failed.push((descriptor.name.clone(), err.clone()));
            return Err(err);
        }
        let bucket = self.loaded.entry(descriptor.language.clone()).or_default();
        if bucket.iter().any(|d| d.name == descriptor.name) {
            let err = RegistrationError::DuplicateName;
            self.failed.push((descriptor.name.clone(), err.clone()));
            return Err(err);
        }
        let descriptor = Arc::new(descriptor);
        let insert_at = bucket
            .iter()
            .position(|d| d.priority < descriptor.priority)
            .unwrap_or(bucket.len());
        bucket.insert(insert_at, descriptor);
        Ok(())
    }

    pub fn plugins_for(&self, language: &str) -> &[Arc<PluginDescriptor>] {
        self.loaded.get(language).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.loaded.keys().map(String::as_str)
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<PluginDescriptor>> {
        self.loaded.values().flatten()
    }

    pub fn failed(&self) -> &[(String, RegistrationError)] {
        &self.failed
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded.values().map(Vec::len).sum()
    }

    /// Drop every registered descriptor, as the supplemented "unload/reload"
    /// entry point requires: a fresh registry can be rebuilt from scratch
    /// without restarting the process.
    pub fn unload_all(&mut self) {
        self.loaded.clear();
        self.failed.clear();
    }
}

/// Parse a comma-separated plugin priority override, e.g.
/// `SSTI_PLUGIN_ORDER=nunjucks,twig`. Unset falls back to registration
/// order within each language (priority as declared by the descriptor).
pub fn parse_plugin_order_override() -> Vec<String> {
    std::env::var("SSTI_PLUGIN_ORDER")
        .ok()
        .map(|var| {
            var.split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}
