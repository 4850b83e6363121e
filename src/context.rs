//! Context enumerator (§4.B): turns a plugin's declared list of syntactic
//! escape contexts into the `(prefix, suffix, wrapper)` triples the
//! injection primitives submit, honouring the requested aggressiveness
//! level or an explicit forced level.

use itertools::Itertools;
use std::collections::{HashMap, HashSet};

/// One declared escape context, as carried by a plugin descriptor.
#[derive(Debug, Clone, Default)]
pub struct ContextDescriptor {
    pub level: u8,
    /// Contains the literal placeholder `{closure}`; defaults to `"{closure}"`
    /// (i.e. the closure alone, no surrounding literal) when unset.
    pub prefix: Option<String>,
    pub suffix: String,
    /// Defaults to a single neutral wrapper when empty.
    pub wrappers: Vec<String>,
    /// Level-string keyed closure matrices; an absent/empty map yields a
    /// single empty closure.
    pub closures: HashMap<u8, Vec<Vec<String>>>,
}

/// `(context_level, closure_level)` — either half may be forced
/// independently via `--force-level`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForceLevel {
    pub context_level: Option<u8>,
    pub closure_level: Option<u8>,
}

/// Expand a single context's `closures` map into the sorted, deduplicated
/// list of candidate closure strings (§4.B.1).
pub fn expand_closures(ctx: &ContextDescriptor, level: u8, force: ForceLevel) -> Vec<String> {
    if ctx.closures.is_empty() {
        return vec![String::new()];
    }
    let mut closures: HashSet<String> = HashSet::new();
    for (&closure_level, matrix) in &ctx.closures {
        if let Some(forced) = force.closure_level {
            if closure_level != forced {
                continue;
            }
        } else if closure_level > level {
            continue;
        }
        if matrix.is_empty() {
            closures.insert(String::new());
            continue;
        }
        for combo in matrix.iter().multi_cartesian_product() {
            let joined: String = combo.into_iter().map(|s| s.as_str()).collect();
            closures.insert(joined);
        }
    }
    let mut out: Vec<String> = closures.into_iter().collect();
    out.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
    out
}

fn substitute_closure(prefix_template: &str, closure: &str) -> String {
    prefix_template.replace("{closure}", closure)
}

/// Enumerate every `(prefix, suffix, wrapper)` triple a plugin should try,
/// in the deterministic order described by §5 ("Ordering"): declared
/// context order, then wrapper order, then closure order (shortest first).
pub fn generate_contexts(
    contexts: &[ContextDescriptor],
    level: u8,
    force: ForceLevel,
) -> Vec<(String, String, String)> {
    let mut out = Vec::new();
    for ctx in contexts {
        if let Some(forced) = force.context_level {
            if ctx.level != forced {
                continue;
            }
        } else if ctx.level > level {
            continue;
        }
        let closures = expand_closures(ctx, level, force);
        let prefix_template = ctx.prefix.as_deref().unwrap_or("{closure}");
        let default_wrapper = vec!["{code}".to_string()];
        let wrappers: &[String] = if ctx.wrappers.is_empty() {
            &default_wrapper
        } else {
            &ctx.wrappers
        };
        for wrapper in wrappers {
            for closure in &closures {
                let prefix = substitute_closure(prefix_template, closure);
                out.push((prefix, ctx.suffix.clone(), wrapper.clone()));
            }
        }
    }
    out
}
