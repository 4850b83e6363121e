//! Concrete engine descriptors (§ supplemented features), one module per
//! hosting language. `all()` is what `main` and the integration tests use
//! to populate a fresh `PluginRegistry`.

pub mod javascript;
pub mod php;
pub mod python;

use crate::plugin::PluginDescriptor;
use crate::registry::{PluginRegistry, RegistrationError};

/// Every descriptor this build ships, in no particular order — priority
/// and language grouping are the registry's job, not this list's.
pub fn all() -> Vec<PluginDescriptor> {
    vec![javascript::nunjucks(), python::jinja2(), php::twig()]
}

/// Build a registry pre-populated with every shipped descriptor,
/// collecting any that failed the version gate instead of panicking —
/// mirrors the reference registry's "loaded vs failed" split (§4.H).
pub fn build_registry() -> (PluginRegistry, Vec<(String, RegistrationError)>) {
    let mut registry = PluginRegistry::new();
    let mut rejected = Vec::new();
    for descriptor in all() {
        let name = descriptor.name.clone();
        if let Err(err) = registry.register(descriptor) {
            rejected.push((name, err));
        }
    }
    (registry, rejected)
}
