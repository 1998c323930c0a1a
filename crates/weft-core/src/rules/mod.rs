/*!
# Rules

Typed, validated weaving rules and the immutable [`RuleSet`] they are
materialized into.

Rule descriptors are YAML maps of rule name to field set. The shape of each
entry is decided by its discriminating key (`struct`, `file`, `raw`,
`function-call` or `func`) and decoded into a closed [`RuleKind`]. Loading is
all-or-nothing: a descriptor with one bad rule produces no rule set at all.

```yaml
http_get_wrapper:
  target: main
  function-call: net/http.Get
  template: "wrap({{ . }})"
  imports:
    wrap: example.com/wrap
```
*/

pub mod loader;
pub mod template;
pub mod version;

use std::path::PathBuf;

use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;
use sha2::{Digest, Sha256};

pub use template::Template;
pub use version::{GoVersion, VersionRange};

/// Descriptors compiled into the binary.
pub const BUILTIN_DESCRIPTORS: &[(&str, &str)] = &[
    ("builtin/net_http.yaml", include_str!("../../rules/net_http.yaml")),
    ("builtin/database_sql.yaml", include_str!("../../rules/database_sql.yaml")),
    ("builtin/runtime.yaml", include_str!("../../rules/runtime.yaml")),
];

#[derive(thiserror::Error, Debug)]
pub enum RuleLoadError {
    #[error("failed to read rule descriptor {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{origin}: malformed rule descriptor: {message}")]
    Yaml { origin: String, message: String },

    #[error("{origin}: rule `{rule}`: {message}")]
    Invalid {
        origin: String,
        rule: String,
        message: String,
    },

    #[error("rule `{rule}` is defined in both {first} and {second}")]
    Duplicate {
        rule: String,
        first: String,
        second: String,
    },
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    /// Import path of the package this rule rewrites.
    pub target: String,
    pub version: Option<VersionRange>,
    /// Descriptor the rule came from.
    pub origin: String,
    pub kind: RuleKind,
}

#[derive(Debug, Clone)]
pub enum RuleKind {
    Func(FuncRule),
    Call(CallRule),
    Struct(StructRule),
    File(FileRule),
    Raw(RawRule),
}

impl RuleKind {
    pub fn label(&self) -> &'static str {
        match self {
            RuleKind::Func(_) => "func",
            RuleKind::Call(_) => "function-call",
            RuleKind::Struct(_) => "struct",
            RuleKind::File(_) => "file",
            RuleKind::Raw(_) => "raw",
        }
    }
}

/// Advice around a function or method.
#[derive(Debug, Clone)]
pub struct FuncRule {
    pub func: String,
    pub recv: Option<String>,
    pub before: Option<String>,
    pub after: Option<String>,
    /// Import path of the package that defines the hooks.
    pub path: String,
}

/// Wrapper around call expressions of `package.func`.
#[derive(Debug, Clone)]
pub struct CallRule {
    pub package: String,
    pub func: String,
    pub template: Template,
    /// Template alias → import path.
    pub imports: IndexMap<String, String>,
}

impl CallRule {
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.package, self.func)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

#[derive(Debug, Clone)]
pub struct StructRule {
    pub type_name: String,
    pub fields: Vec<FieldSpec>,
    pub methods: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FileRule {
    /// Glob on the file's base name.
    pub pattern: String,
    matcher: Regex,
    pub replace: String,
}

impl FileRule {
    pub(crate) fn new(pattern: &str, replace: String) -> Result<Self, String> {
        let mut expr = String::from("^");
        for c in pattern.chars() {
            match c {
                '*' => expr.push_str("[^/]*"),
                '?' => expr.push_str("[^/]"),
                '/' => return Err(format!("file pattern {pattern:?} must match a base name")),
                other => expr.push_str(&regex::escape(&other.to_string())),
            }
        }
        expr.push('$');
        let matcher = Regex::new(&expr).map_err(|e| format!("file pattern {pattern:?}: {e}"))?;
        Ok(Self {
            pattern: pattern.to_string(),
            matcher,
            replace,
        })
    }

    pub fn matches(&self, base_name: &str) -> bool {
        self.matcher.is_match(base_name)
    }
}

/// Verbatim statements at a function's entry.
#[derive(Debug, Clone)]
pub struct RawRule {
    pub func: String,
    pub recv: Option<String>,
    pub raw: String,
}

/// Immutable, ordered collection of rules.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
    descriptors: Vec<(String, String)>,
}

/// Rules selected for one package, in load order.
#[derive(Debug, Clone)]
pub struct MatchedRules<'a> {
    rules: Vec<&'a Rule>,
}

impl RuleSet {
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.name == name)
    }

    /// Every rule whose target is `import_path` and whose version range, if
    /// any, contains `version`. A constrained rule never matches a package of
    /// unknown version.
    pub fn matching(&self, import_path: &str, version: Option<&GoVersion>) -> MatchedRules<'_> {
        let rules = self
            .rules
            .iter()
            .filter(|rule| rule.target == import_path)
            .filter(|rule| match (&rule.version, version) {
                (None, _) => true,
                (Some(range), Some(v)) => range.contains(v),
                (Some(_), None) => false,
            })
            .collect();
        MatchedRules { rules }
    }

    /// Whether any rule targets `import_path`, regardless of version.
    pub fn targets(&self, import_path: &str) -> bool {
        self.rules.iter().any(|r| r.target == import_path)
    }

    pub fn func_rules(&self, import_path: &str, func: &str, recv: Option<&str>) -> Vec<&Rule> {
        self.matching_unversioned(import_path).func_rules(func, recv)
    }

    /// Call rules for `callee_path.func`, across every target.
    pub fn call_rules(&self, callee_path: &str, func: &str) -> Vec<(&Rule, &CallRule)> {
        MatchedRules {
            rules: self.rules.iter().collect(),
        }
        .call_rules(callee_path, func)
    }

    fn matching_unversioned(&self, import_path: &str) -> MatchedRules<'_> {
        MatchedRules {
            rules: self.rules.iter().filter(|r| r.target == import_path).collect(),
        }
    }

    /// Import paths woven code may reference: hook packages and template
    /// imports. These must be part of the build graph.
    pub fn required_packages(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for rule in &self.rules {
            let paths: Vec<&str> = match &rule.kind {
                RuleKind::Func(f) => vec![f.path.as_str()],
                RuleKind::Call(c) => c.imports.values().map(String::as_str).collect(),
                _ => Vec::new(),
            };
            for path in paths {
                if !out.iter().any(|p| p == path) {
                    out.push(path.to_string());
                }
            }
        }
        out
    }

    /// Stable digest of the loaded descriptors and the weaver version.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(crate::VERSION.as_bytes());
        for (origin, text) in &self.descriptors {
            hasher.update((origin.len() as u64).to_le_bytes());
            hasher.update(origin.as_bytes());
            hasher.update((text.len() as u64).to_le_bytes());
            hasher.update(text.as_bytes());
        }
        hex::encode(&hasher.finalize()[..16])
    }

    /// Descriptor origins in load order.
    pub fn origins(&self) -> impl Iterator<Item = &str> {
        self.descriptors.iter().map(|(origin, _)| origin.as_str())
    }
}

impl<'a> MatchedRules<'a> {
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a Rule> + '_ {
        self.rules.iter().copied()
    }

    /// Func and raw rules pointing at one function, in load order.
    pub fn func_rules(&self, func: &str, recv: Option<&str>) -> Vec<&'a Rule> {
        let recv = recv.map(crate::source::normalize_receiver);
        self.iter()
            .filter(|rule| {
                let (f, r) = match &rule.kind {
                    RuleKind::Func(f) => (f.func.as_str(), f.recv.as_deref()),
                    RuleKind::Raw(r) => (r.func.as_str(), r.recv.as_deref()),
                    _ => return false,
                };
                f == func && r.map(crate::source::normalize_receiver) == recv
            })
            .collect()
    }

    pub fn call_rules(&self, callee_path: &str, func: &str) -> Vec<(&'a Rule, &'a CallRule)> {
        self.iter()
            .filter_map(|rule| match &rule.kind {
                RuleKind::Call(call) if call.package == callee_path && call.func == func => {
                    Some((rule, call))
                }
                _ => None,
            })
            .collect()
    }

    /// Every call rule, in load order.
    pub fn all_call_rules(&self) -> Vec<(&'a Rule, &'a CallRule)> {
        self.iter()
            .filter_map(|rule| match &rule.kind {
                RuleKind::Call(call) => Some((rule, call)),
                _ => None,
            })
            .collect()
    }

    pub fn struct_rules(&self) -> Vec<(&'a Rule, &'a StructRule)> {
        self.iter()
            .filter_map(|rule| match &rule.kind {
                RuleKind::Struct(s) => Some((rule, s)),
                _ => None,
            })
            .collect()
    }

    pub fn file_rules(&self) -> Vec<(&'a Rule, &'a FileRule)> {
        self.iter()
            .filter_map(|rule| match &rule.kind {
                RuleKind::File(f) => Some((rule, f)),
                _ => None,
            })
            .collect()
    }

    /// Distinct (function, receiver) pointcuts of func and raw rules.
    pub fn pointcuts(&self) -> Vec<(String, Option<String>)> {
        let mut out: Vec<(String, Option<String>)> = Vec::new();
        for rule in self.iter() {
            let key = match &rule.kind {
                RuleKind::Func(f) => (f.func.clone(), f.recv.clone()),
                RuleKind::Raw(r) => (r.func.clone(), r.recv.clone()),
                _ => continue,
            };
            if !out.contains(&key) {
                out.push(key);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULES: &str = r#"
bar_advice:
  target: example.com/pkgA
  func: Bar
  before: BarOnEnter
  after: BarOnExit
  path: example.com/hooks
old_only:
  target: example.com/pkgA
  version: "[1.0.0,1.5.0)"
  raw: "println(\"hi\")"
  func: Bar
get_wrapper:
  target: main
  function-call: net/http.Get
  template: "wrap({{ . }})"
  imports:
    wrap: pkg/wrap
"#;

    #[test]
    fn test_matching_respects_versions() {
        let set = RuleSet::from_yaml("test.yaml", RULES).unwrap();
        let v14 = GoVersion::parse("v1.4.0").unwrap();
        let v20 = GoVersion::parse("v2.0.0").unwrap();
        assert_eq!(set.matching("example.com/pkgA", Some(&v14)).len(), 2);
        assert_eq!(set.matching("example.com/pkgA", Some(&v20)).len(), 1);
        assert_eq!(set.matching("example.com/pkgA", None).len(), 1);
        assert!(set.matching("example.com/other", None).is_empty());
    }

    #[test]
    fn test_narrowing_queries() {
        let set = RuleSet::from_yaml("test.yaml", RULES).unwrap();
        assert_eq!(set.func_rules("example.com/pkgA", "Bar", None).len(), 2);
        assert!(set.func_rules("example.com/pkgA", "Bar", Some("*T")).is_empty());
        let calls = set.call_rules("net/http", "Get");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1.qualified(), "net/http.Get");
    }

    #[test]
    fn test_required_packages_are_deduplicated() {
        let set = RuleSet::from_yaml("test.yaml", RULES).unwrap();
        assert_eq!(set.required_packages(), vec!["example.com/hooks", "pkg/wrap"]);
    }

    #[test]
    fn test_fingerprint_is_stable_and_content_sensitive() {
        let a = RuleSet::from_yaml("test.yaml", RULES).unwrap();
        let b = RuleSet::from_yaml("test.yaml", RULES).unwrap();
        let c = RuleSet::from_yaml("test.yaml", &RULES.replace("BarOnExit", "BarDone")).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 32);
    }

    #[test]
    fn test_file_glob() {
        let rule = FileRule::new("client_*.go", String::new()).unwrap();
        assert!(rule.matches("client_http.go"));
        assert!(!rule.matches("server.go"));
        assert!(FileRule::new("a/b.go", String::new()).is_err());
    }

    #[test]
    fn test_builtin_rules_load() {
        let set = RuleSet::builtin().unwrap();
        assert!(!set.is_empty());
        assert!(set.origins().all(|o| o.starts_with("builtin/")));
    }
}
