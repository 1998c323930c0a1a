/*!
# Rule Loader

Decodes descriptor YAML into [`Rule`]s. Every field set is checked against
its variant before anything is returned, so a rule set either loads
completely or not at all.
*/

use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info};

use super::{
    CallRule, FieldSpec, FileRule, FuncRule, RawRule, Rule, RuleKind, RuleLoadError, RuleSet,
    StructRule, Template, VersionRange, BUILTIN_DESCRIPTORS,
};
use crate::source::{self, ParseMode, SourceUnit};
use crate::WeftConfig;

/// Raw field set of one rule, before dispatch.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleFields {
    target: Option<String>,
    version: Option<String>,
    func: Option<String>,
    recv: Option<String>,
    before: Option<String>,
    after: Option<String>,
    path: Option<String>,
    #[serde(rename = "function-call")]
    function_call: Option<String>,
    template: Option<String>,
    imports: Option<IndexMap<String, String>>,
    #[serde(rename = "struct")]
    struct_name: Option<String>,
    fields: Option<Vec<FieldSpec>>,
    methods: Option<Vec<String>>,
    file: Option<String>,
    replace: Option<String>,
    raw: Option<String>,
}

impl RuleFields {
    /// Keys present in the descriptor, by YAML name.
    fn present(&self) -> Vec<&'static str> {
        let mut keys = Vec::new();
        let mut check = |set: bool, key: &'static str| {
            if set {
                keys.push(key);
            }
        };
        check(self.func.is_some(), "func");
        check(self.recv.is_some(), "recv");
        check(self.before.is_some(), "before");
        check(self.after.is_some(), "after");
        check(self.path.is_some(), "path");
        check(self.function_call.is_some(), "function-call");
        check(self.template.is_some(), "template");
        check(self.imports.is_some(), "imports");
        check(self.struct_name.is_some(), "struct");
        check(self.fields.is_some(), "fields");
        check(self.methods.is_some(), "methods");
        check(self.file.is_some(), "file");
        check(self.replace.is_some(), "replace");
        check(self.raw.is_some(), "raw");
        keys
    }
}

fn identifier() -> &'static Regex {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    IDENT.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern"))
}

fn import_path() -> &'static Regex {
    static PATH: OnceLock<Regex> = OnceLock::new();
    PATH.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_.~+\-]+(/[A-Za-z0-9_.~+\-]+)*$").expect("import path pattern")
    })
}

fn is_import_path(path: &str) -> bool {
    import_path().is_match(path) && !path.split('/').any(|elem| elem == "..." || elem == "." || elem == "..")
}

impl RuleSet {
    /// Decode one descriptor. `origin` names it in errors.
    pub fn from_yaml(origin: &str, yaml: &str) -> Result<Self, RuleLoadError> {
        let mut set = RuleSet::default();
        set.extend_from_yaml(origin, yaml)?;
        Ok(set)
    }

    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, RuleLoadError> {
        let mut set = RuleSet::default();
        set.extend_from_file(path.as_ref())?;
        Ok(set)
    }

    /// The descriptors compiled into the binary.
    pub fn builtin() -> Result<Self, RuleLoadError> {
        let mut set = RuleSet::default();
        for (origin, yaml) in BUILTIN_DESCRIPTORS {
            set.extend_from_yaml(origin, yaml)?;
        }
        Ok(set)
    }

    /// Builtin descriptors (unless disabled) followed by the configured
    /// rule files, in order.
    pub fn load(config: &WeftConfig) -> Result<Self, RuleLoadError> {
        let mut set = if config.builtin_rules {
            Self::builtin()?
        } else {
            RuleSet::default()
        };
        for path in &config.rule_files {
            set.extend_from_file(path)?;
        }
        info!(rules = set.len(), descriptors = set.descriptors.len(), "Loaded rule set");
        Ok(set)
    }

    fn extend_from_file(&mut self, path: &Path) -> Result<(), RuleLoadError> {
        let yaml = fs::read_to_string(path).map_err(|source| RuleLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.extend_from_yaml(&path.display().to_string(), &yaml)
    }

    fn extend_from_yaml(&mut self, origin: &str, yaml: &str) -> Result<(), RuleLoadError> {
        let entries: IndexMap<String, RuleFields> = if yaml.trim().is_empty() {
            IndexMap::new()
        } else {
            serde_yaml_bw::from_str(yaml).map_err(|e| RuleLoadError::Yaml {
                origin: origin.to_string(),
                message: e.to_string(),
            })?
        };

        let mut decoded = Vec::with_capacity(entries.len());
        for (name, fields) in entries {
            if let Some(existing) = self.rules.iter().find(|r| r.name == name) {
                return Err(RuleLoadError::Duplicate {
                    rule: name,
                    first: existing.origin.clone(),
                    second: origin.to_string(),
                });
            }
            let rule = decode_rule(origin, &name, fields).map_err(|message| RuleLoadError::Invalid {
                origin: origin.to_string(),
                rule: name.clone(),
                message,
            })?;
            debug!(rule = %rule.name, kind = rule.kind.label(), target = %rule.target, "Decoded rule");
            decoded.push(rule);
        }

        self.rules.extend(decoded);
        self.descriptors.push((origin.to_string(), yaml.to_string()));
        Ok(())
    }
}

fn decode_rule(origin: &str, name: &str, mut fields: RuleFields) -> Result<Rule, String> {
    if !identifier().is_match(&name.replace('-', "_")) {
        return Err("rule names must be identifiers".to_string());
    }

    let target = fields
        .target
        .take()
        .ok_or_else(|| "missing `target`".to_string())?;
    if !is_import_path(&target) {
        return Err(format!("target {target:?} is not a concrete import path"));
    }
    let version = fields
        .version
        .take()
        .map(|v| VersionRange::parse(&v))
        .transpose()?;

    let kind = if fields.struct_name.is_some() {
        only(&fields, "struct", &["struct", "fields", "methods"])?;
        decode_struct(fields)?
    } else if fields.file.is_some() {
        only(&fields, "file", &["file", "replace"])?;
        decode_file(fields)?
    } else if fields.raw.is_some() {
        only(&fields, "raw", &["raw", "func", "recv"])?;
        decode_raw(fields)?
    } else if fields.function_call.is_some() || fields.template.is_some() {
        only(&fields, "function-call", &["function-call", "template", "imports"])?;
        decode_call(fields)?
    } else if fields.func.is_some() {
        only(&fields, "func", &["func", "recv", "before", "after", "path"])?;
        decode_func(fields)?
    } else {
        return Err(
            "rule must have one of `struct`, `file`, `raw`, `function-call` or `func`".to_string(),
        );
    };

    Ok(Rule {
        name: name.to_string(),
        target,
        version,
        origin: origin.to_string(),
        kind,
    })
}

/// Reject keys that belong to another variant.
fn only(fields: &RuleFields, variant: &str, allowed: &[&str]) -> Result<(), String> {
    match fields.present().into_iter().find(|key| !allowed.contains(key)) {
        Some(stray) => Err(format!("`{stray}` is not valid on a `{variant}` rule")),
        None => Ok(()),
    }
}

fn check_ident(what: &str, value: &str) -> Result<(), String> {
    if identifier().is_match(value) {
        Ok(())
    } else {
        Err(format!("{what} {value:?} is not a Go identifier"))
    }
}

fn check_recv(recv: Option<&str>) -> Result<(), String> {
    if let Some(recv) = recv {
        check_ident("receiver type", recv.trim_start_matches('*').trim())?;
    }
    Ok(())
}

fn decode_func(fields: RuleFields) -> Result<RuleKind, String> {
    let func = fields.func.unwrap_or_default();
    check_ident("function", &func)?;
    check_recv(fields.recv.as_deref())?;
    let path = fields
        .path
        .ok_or_else(|| "`func` rules need the hook package `path`".to_string())?;
    if !is_import_path(&path) {
        return Err(format!("hook path {path:?} is not an import path"));
    }
    if fields.before.is_none() && fields.after.is_none() {
        return Err("`func` rules need a `before` or `after` hook".to_string());
    }
    for hook in [&fields.before, &fields.after].into_iter().flatten() {
        check_ident("hook", hook)?;
    }
    Ok(RuleKind::Func(FuncRule {
        func,
        recv: fields.recv,
        before: fields.before,
        after: fields.after,
        path,
    }))
}

fn decode_call(fields: RuleFields) -> Result<RuleKind, String> {
    let qualified = fields
        .function_call
        .ok_or_else(|| "`template` given without `function-call`".to_string())?;
    let template = fields
        .template
        .ok_or_else(|| "`function-call` given without `template`".to_string())?;

    let (package, func) = qualified.rsplit_once('.').ok_or_else(|| {
        format!("function-call {qualified:?} must have the form <import-path>.<identifier>")
    })?;
    if !is_import_path(package) || !identifier().is_match(func) || package.ends_with('/') {
        return Err(format!(
            "function-call {qualified:?} must have the form <import-path>.<identifier>"
        ));
    }

    let imports = fields.imports.unwrap_or_default();
    for (alias, path) in &imports {
        check_ident("import alias", alias)?;
        if alias == "_" || alias == "." {
            return Err(format!("import alias {alias:?} cannot be referenced by a template"));
        }
        if !is_import_path(path) {
            return Err(format!("import {path:?} is not an import path"));
        }
    }
    let template = Template::compile(&template, &imports)?;

    Ok(RuleKind::Call(CallRule {
        package: package.to_string(),
        func: func.to_string(),
        template,
        imports,
    }))
}

fn decode_struct(fields: RuleFields) -> Result<RuleKind, String> {
    let type_name = fields.struct_name.unwrap_or_default();
    check_ident("struct", &type_name)?;
    let field_specs = fields.fields.unwrap_or_default();
    let methods = fields.methods.unwrap_or_default();
    if field_specs.is_empty() && methods.is_empty() {
        return Err("`struct` rules need `fields` or `methods`".to_string());
    }

    for field in &field_specs {
        check_ident("field", &field.name)?;
        let probe = format!("package p\n\ntype _ struct {{\n\t{} {}\n}}\n", field.name, field.ty);
        parse_probe(&probe).map_err(|e| format!("field `{}` has an invalid type: {e}", field.name))?;
    }
    for method in &methods {
        let probe = format!("package p\n\n{method}\n");
        let unit = parse_probe(&probe).map_err(|e| format!("invalid method source: {e}"))?;
        let decls = unit
            .root()
            .map(source::children)
            .unwrap_or_default()
            .into_iter()
            .filter(|n| n.kind() != "package_clause" && n.kind() != "comment")
            .map(|n| n.kind())
            .collect::<Vec<_>>();
        if decls != ["method_declaration"] {
            return Err("each entry of `methods` must be exactly one method declaration".to_string());
        }
    }

    Ok(RuleKind::Struct(StructRule {
        type_name,
        fields: field_specs,
        methods,
    }))
}

fn decode_file(fields: RuleFields) -> Result<RuleKind, String> {
    let pattern = fields.file.unwrap_or_default();
    let replace = fields
        .replace
        .ok_or_else(|| "`file` rules need `replace` source".to_string())?;
    parse_probe(&replace).map_err(|e| format!("replacement is not valid Go: {e}"))?;
    FileRule::new(&pattern, replace).map(RuleKind::File)
}

fn decode_raw(fields: RuleFields) -> Result<RuleKind, String> {
    let func = fields
        .func
        .ok_or_else(|| "`raw` rules need the target `func`".to_string())?;
    check_ident("function", &func)?;
    check_recv(fields.recv.as_deref())?;
    let raw = fields.raw.unwrap_or_default();
    let probe = format!("package p\n\nfunc _() {{\n{raw}\n}}\n");
    parse_probe(&probe).map_err(|e| format!("raw statements are not valid Go: {e}"))?;
    Ok(RuleKind::Raw(RawRule {
        func,
        recv: fields.recv,
        raw,
    }))
}

fn parse_probe(text: &str) -> Result<SourceUnit, String> {
    SourceUnit::parse("rule.go", text, ParseMode::SkipObjectResolution).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invalid(yaml: &str) -> String {
        match RuleSet::from_yaml("t.yaml", yaml).unwrap_err() {
            RuleLoadError::Invalid { message, .. } => message,
            other => panic!("expected invalid rule, got {other}"),
        }
    }

    #[test]
    fn test_dispatch_by_discriminant() {
        let yaml = r#"
s:
  target: runtime
  struct: g
  fields:
    - name: weft_ctx
      type: interface{}
f:
  target: example.com/a
  file: "zz_*.go"
  replace: "package a\n"
r:
  target: example.com/a
  func: Run
  raw: "_ = 1"
c:
  target: example.com/a
  function-call: fmt.Println
  template: "log({{ . }})"
h:
  target: example.com/a
  func: Run
  recv: "*Server"
  after: OnExit
  path: example.com/hooks
"#;
        let set = RuleSet::from_yaml("t.yaml", yaml).unwrap();
        let labels: Vec<_> = set.rules().iter().map(|r| r.kind.label()).collect();
        assert_eq!(labels, ["struct", "file", "raw", "function-call", "func"]);
    }

    #[test]
    fn test_function_call_without_dot_fails() {
        let msg = invalid(
            "bad:\n  target: main\n  function-call: Println\n  template: \"f({{ . }})\"\n",
        );
        assert!(msg.contains("<import-path>.<identifier>"), "{msg}");
    }

    #[test]
    fn test_function_call_without_template_fails() {
        let msg = invalid("bad:\n  target: main\n  function-call: fmt.Println\n");
        assert!(msg.contains("without `template`"));
    }

    #[test]
    fn test_template_without_placeholder_fails() {
        let msg = invalid("bad:\n  target: main\n  function-call: fmt.Println\n  template: \"wrap()\"\n");
        assert!(msg.contains("placeholder"));
    }

    #[test]
    fn test_target_must_be_concrete() {
        assert!(invalid("x:\n  target: example.com/...\n  func: F\n  before: B\n  path: h\n")
            .contains("concrete"));
        assert!(invalid("x:\n  func: F\n  before: B\n  path: h\n").contains("target"));
    }

    #[test]
    fn test_func_rule_requirements() {
        assert!(invalid("x:\n  target: a\n  func: F\n  path: h\n").contains("`before` or `after`"));
        assert!(invalid("x:\n  target: a\n  func: F\n  before: B\n").contains("path"));
    }

    #[test]
    fn test_stray_keys_are_rejected() {
        let msg = invalid("x:\n  target: a\n  struct: T\n  methods: []\n  before: B\n");
        assert!(msg.contains("`before`"));
    }

    #[test]
    fn test_unknown_keys_are_yaml_errors() {
        let err = RuleSet::from_yaml("t.yaml", "x:\n  target: a\n  funk: F\n").unwrap_err();
        assert!(matches!(err, RuleLoadError::Yaml { .. }));
    }

    #[test]
    fn test_one_bad_rule_loads_nothing() {
        let mut set = RuleSet::from_yaml("a.yaml", "ok:\n  target: a\n  func: F\n  raw: \"_ = 1\"\n").unwrap();
        let yaml = "good:\n  target: a\n  func: G\n  raw: \"_ = 2\"\nbad:\n  target: a\n  func: H\n  raw: \"if {\"\n";
        assert!(set.extend_from_yaml("b.yaml", yaml).is_err());
        assert_eq!(set.len(), 1);
        assert!(set.get("good").is_none());
    }

    #[test]
    fn test_duplicate_names_across_descriptors() {
        let mut set = RuleSet::from_yaml("a.yaml", "ok:\n  target: a\n  func: F\n  raw: \"_ = 1\"\n").unwrap();
        let err = set
            .extend_from_yaml("b.yaml", "ok:\n  target: b\n  func: F\n  raw: \"_ = 1\"\n")
            .unwrap_err();
        assert!(matches!(err, RuleLoadError::Duplicate { .. }));
    }

    #[test]
    fn test_struct_method_must_be_a_method() {
        let msg = invalid("x:\n  target: a\n  struct: T\n  methods:\n    - \"func F() {}\"\n");
        assert!(msg.contains("method declaration"));
    }
}
