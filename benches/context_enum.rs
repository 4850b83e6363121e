use criterion::{criterion_group, criterion_main, Criterion};
use std::collections::HashMap;
use tplstrike::context::{generate_contexts, ContextDescriptor, ForceLevel};

fn nunjucks_like_contexts() -> Vec<ContextDescriptor> {
    let mut closures = HashMap::new();
    closures.insert(
        1u8,
        vec![vec!["\"".to_string(), "'".to_string()], vec![String::new(), ")".to_string()]],
    );
    vec![
        ContextDescriptor::default(),
        ContextDescriptor {
            level: 1,
            prefix: Some("{closure}}}".to_string()),
            suffix: "{1".to_string(),
            wrappers: vec![],
            closures: closures.clone(),
        },
        ContextDescriptor {
            level: 5,
            prefix: Some("{closure} %}{% endfor %}{% for a in [1] %}".to_string()),
            suffix: String::new(),
            wrappers: vec![],
            closures,
        },
    ]
}

fn bench_generate_contexts(c: &mut Criterion) {
    let contexts = nunjucks_like_contexts();
    c.bench_function("generate_contexts_level_5", |b| {
        b.iter(|| generate_contexts(&contexts, 5, ForceLevel::default()))
    });
    c.bench_function("generate_contexts_level_1", |b| {
        b.iter(|| generate_contexts(&contexts, 1, ForceLevel::default()))
    });
}

criterion_group!(benches, bench_generate_contexts);
criterion_main!(benches);
