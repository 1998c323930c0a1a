//! Import table of a Go file: local package names resolved to import paths,
//! plus the anchor offsets used when new imports have to be spliced in.

use std::collections::BTreeSet;
use std::ops::Range;

use tree_sitter::Node;

use super::node_text;

/// One import spec as written in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSpec {
    /// Explicit name (`foo`, `_` or `.`), if any.
    pub name: Option<String>,
    pub path: String,
    pub span: Range<usize>,
}

impl ImportSpec {
    /// Name the file uses to refer to this package, if it can refer to it
    /// at all through a qualifier.
    pub fn local_name(&self) -> Option<String> {
        match self.name.as_deref() {
            Some("_") | Some(".") => None,
            Some(name) => Some(name.to_string()),
            None => Some(default_package_name(&self.path)),
        }
    }

    pub fn is_dot(&self) -> bool {
        self.name.as_deref() == Some(".")
    }
}

/// Where new import specs go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportAnchor {
    /// Offset of the `)` closing the first grouped import declaration.
    Group(usize),
    /// End of the last single-spec import declaration.
    AfterDecl(usize),
    /// End of the package clause; the file has no imports yet.
    AfterPackage(usize),
}

#[derive(Debug, Clone, Default)]
pub struct ImportTable {
    specs: Vec<ImportSpec>,
    anchor: Option<ImportAnchor>,
}

impl ImportTable {
    /// Collect the import declarations of a `source_file` node.
    pub fn from_root(root: Node<'_>, text: &str) -> Self {
        let mut table = Self::default();
        let mut package_end = None;
        let mut group_close = None;
        let mut last_decl_end = None;

        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            match child.kind() {
                "package_clause" => package_end = Some(child.end_byte()),
                "import_declaration" => {
                    last_decl_end = Some(child.end_byte());
                    let mut inner = child.walk();
                    for spec_or_list in child.named_children(&mut inner) {
                        match spec_or_list.kind() {
                            "import_spec" => table.push_spec(spec_or_list, text),
                            "import_spec_list" => {
                                if group_close.is_none() {
                                    group_close = Some(spec_or_list.end_byte() - 1);
                                }
                                let mut specs = spec_or_list.walk();
                                for spec in spec_or_list.named_children(&mut specs) {
                                    if spec.kind() == "import_spec" {
                                        table.push_spec(spec, text);
                                    }
                                }
                            }
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }

        table.anchor = match (group_close, last_decl_end, package_end) {
            (Some(close), _, _) => Some(ImportAnchor::Group(close)),
            (None, Some(end), _) => Some(ImportAnchor::AfterDecl(end)),
            (None, None, Some(end)) => Some(ImportAnchor::AfterPackage(end)),
            _ => None,
        };
        table
    }

    fn push_spec(&mut self, spec: Node<'_>, text: &str) {
        let Some(path_node) = spec.child_by_field_name("path") else {
            return;
        };
        let path = unquote(node_text(path_node, text));
        let name = spec
            .child_by_field_name("name")
            .map(|n| node_text(n, text).to_string());
        self.specs.push(ImportSpec {
            name,
            path,
            span: spec.byte_range(),
        });
    }

    pub fn specs(&self) -> &[ImportSpec] {
        &self.specs
    }

    pub fn anchor(&self) -> Option<ImportAnchor> {
        self.anchor
    }

    /// Import path a qualifier refers to.
    pub fn resolve(&self, local: &str) -> Option<&str> {
        self.specs
            .iter()
            .find(|s| s.local_name().as_deref() == Some(local))
            .map(|s| s.path.as_str())
    }

    /// Paths imported with `.`.
    pub fn dot_imports(&self) -> impl Iterator<Item = &str> {
        self.specs.iter().filter(|s| s.is_dot()).map(|s| s.path.as_str())
    }

    pub fn is_imported(&self, path: &str) -> bool {
        self.specs.iter().any(|s| s.path == path)
    }

    /// Qualifier usable to reach `path`, if the file already imports it
    /// under a usable name.
    pub fn local_name_for(&self, path: &str) -> Option<String> {
        self.specs
            .iter()
            .filter(|s| s.path == path)
            .find_map(ImportSpec::local_name)
    }

    pub fn names_in_use(&self) -> BTreeSet<String> {
        self.specs.iter().filter_map(ImportSpec::local_name).collect()
    }

    /// Record a spec that has been queued as an edit.
    pub(crate) fn record(&mut self, name: Option<String>, path: &str) {
        self.specs.push(ImportSpec {
            name,
            path: path.to_string(),
            span: 0..0,
        });
    }
}

/// Package name Go assumes for an import path: the last element, skipping
/// a major-version suffix (`/v2`), without a `go-` prefix and cut at the
/// first character that cannot appear in an identifier.
pub fn default_package_name(path: &str) -> String {
    let mut elems = path.rsplit('/');
    let mut last = elems.next().unwrap_or(path);
    if is_major_version(last) {
        if let Some(prev) = elems.next() {
            last = prev;
        }
    }
    let last = last.strip_prefix("go-").unwrap_or(last);
    last.chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect()
}

fn is_major_version(elem: &str) -> bool {
    elem.len() > 1
        && elem.starts_with('v')
        && elem[1..].chars().all(|c| c.is_ascii_digit())
}

/// Strip Go string literal quotes from an import path.
pub fn unquote(literal: &str) -> String {
    literal
        .trim()
        .trim_start_matches(['"', '`'])
        .trim_end_matches(['"', '`'])
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_package_name() {
        assert_eq!(default_package_name("net/http"), "http");
        assert_eq!(default_package_name("fmt"), "fmt");
        assert_eq!(default_package_name("github.com/redis/go-redis/v9"), "redis");
        assert_eq!(default_package_name("github.com/mattn/go-sqlite3"), "sqlite3");
        assert_eq!(default_package_name("gopkg.in/yaml.v3"), "yaml");
    }

    #[test]
    fn test_unquote() {
        assert_eq!(unquote("\"net/http\""), "net/http");
        assert_eq!(unquote("`pkg/wrap`"), "pkg/wrap");
    }
}
