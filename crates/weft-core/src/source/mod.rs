/*!
# Source Units

Formatting-preserving, in-memory representation of one Go file.

A [`SourceUnit`] keeps the original text untouched and records every change
as a byte-span [`Edit`] addressed in original offsets; rendering copies the
untouched bytes verbatim. The concrete parser backend (tree-sitter with the
Go grammar) stays behind this module: callers query declarations and call
sites through the unit and never build parsers themselves.
*/

pub mod builder;
pub mod edits;
pub mod imports;

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tree_sitter::{Node, Parser, Tree};

pub use builder::{GoExpr, GoFunc, GoInterface, GoStmt, GoStruct, ToSource};
pub use edits::{Edit, EditConflict, EditSet};
pub use imports::{default_package_name, ImportAnchor, ImportSpec, ImportTable};

/// How much of a file to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// Syntax tree (comments included) plus the import table.
    Full,
    /// Lexical fast path that only reads the package name.
    PackageClauseOnly,
    /// Syntax tree without resolving package qualifiers.
    SkipObjectResolution,
}

/// Source-level parse failures
#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    #[error("failed to load Go grammar: {0}")]
    Language(String),

    #[error("{file}:{line}:{column}: syntax error near `{snippet}`")]
    Syntax {
        file: PathBuf,
        line: usize,
        column: usize,
        snippet: String,
    },

    #[error("{file}: missing package clause")]
    MissingPackage { file: PathBuf },

    #[error("{file}: parser produced no syntax tree")]
    NoTree { file: PathBuf },

    #[error("failed to read {file}: {source}")]
    Io {
        file: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A function or method declaration.
#[derive(Debug, Clone)]
pub struct FuncDecl<'t> {
    pub node: Node<'t>,
    pub name: &'t str,
    /// Receiver type with whitespace and type arguments removed
    /// (`*Server`, `List`), `None` for plain functions.
    pub receiver: Option<String>,
    pub body: Option<Node<'t>>,
}

/// A named type declaration.
#[derive(Debug, Clone, Copy)]
pub struct TypeDecl<'t> {
    /// The enclosing `type` declaration (possibly grouped).
    pub decl: Node<'t>,
    pub spec: Node<'t>,
}

pub struct SourceUnit {
    path: PathBuf,
    text: String,
    mode: ParseMode,
    package: String,
    tree: Option<Tree>,
    imports: ImportTable,
    edits: EditSet,
}

impl std::fmt::Debug for SourceUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceUnit")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("package", &self.package)
            .field("edits", &self.edits.len())
            .finish()
    }
}

/// Fresh parser for the Go grammar.
pub fn go_parser() -> Result<Parser, ParseError> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_go::LANGUAGE.into())
        .map_err(|e| ParseError::Language(e.to_string()))?;
    Ok(parser)
}

impl SourceUnit {
    /// Parse `text` as the contents of `path`.
    pub fn parse(
        path: impl Into<PathBuf>,
        text: impl Into<String>,
        mode: ParseMode,
    ) -> Result<Self, ParseError> {
        let path = path.into();
        let text = text.into();

        if mode == ParseMode::PackageClauseOnly {
            let package = scan_package_clause(&text)
                .ok_or_else(|| ParseError::MissingPackage { file: path.clone() })?;
            return Ok(Self {
                path,
                text,
                mode,
                package,
                tree: None,
                imports: ImportTable::default(),
                edits: EditSet::new(),
            });
        }

        let mut parser = go_parser()?;
        let tree = parser
            .parse(&text, None)
            .ok_or_else(|| ParseError::NoTree { file: path.clone() })?;
        let root = tree.root_node();
        if let Some(bad) = first_error(root) {
            return Err(syntax_error(&path, &text, bad));
        }

        let package = children(root)
            .into_iter()
            .find(|n| n.kind() == "package_clause")
            .and_then(|clause| children(clause).into_iter().find(|n| n.kind() == "package_identifier"))
            .map(|ident| node_text(ident, &text).to_string())
            .ok_or_else(|| ParseError::MissingPackage { file: path.clone() })?;

        let imports = if mode == ParseMode::Full {
            ImportTable::from_root(root, &text)
        } else {
            ImportTable::default()
        };

        Ok(Self {
            path,
            text,
            mode,
            package,
            tree: Some(tree),
            imports,
            edits: EditSet::new(),
        })
    }

    /// Read and parse a file from disk.
    pub fn read(path: impl AsRef<Path>, mode: ParseMode) -> Result<Self, ParseError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ParseError::Io {
            file: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, text, mode)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn mode(&self) -> ParseMode {
        self.mode
    }

    pub fn package_name(&self) -> &str {
        &self.package
    }

    pub fn imports(&self) -> &ImportTable {
        &self.imports
    }

    pub fn insert(&mut self, at: usize, text: impl Into<String>) -> Result<(), EditConflict> {
        self.edits.insert(at, text)
    }

    pub fn replace(
        &mut self,
        start: usize,
        end: usize,
        text: impl Into<String>,
    ) -> Result<(), EditConflict> {
        self.edits.replace(start, end, text)
    }

    /// Replace `start..end` with `wrap(<current rendering of the span>)`.
    pub fn wrap<F>(&mut self, start: usize, end: usize, wrap: F) -> Result<(), EditConflict>
    where
        F: FnOnce(&str) -> String,
    {
        self.edits.wrap(&self.text, start, end, wrap)
    }

    pub fn is_modified(&self) -> bool {
        !self.edits.is_empty()
    }

    /// Root `source_file` node; `None` in package-clause-only mode.
    pub fn root(&self) -> Option<Node<'_>> {
        self.tree.as_ref().map(Tree::root_node)
    }

    pub fn node_text(&self, node: Node<'_>) -> &str {
        node_text(node, &self.text)
    }

    /// 1-based line of a byte offset, for diagnostics.
    pub fn line_of(&self, offset: usize) -> usize {
        self.text[..offset.min(self.text.len())].matches('\n').count() + 1
    }

    /// Every top-level function and method declaration, in file order.
    pub fn functions(&self) -> Vec<FuncDecl<'_>> {
        let Some(root) = self.root() else {
            return Vec::new();
        };
        children(root)
            .into_iter()
            .filter(|n| matches!(n.kind(), "function_declaration" | "method_declaration"))
            .filter_map(|node| {
                let name = node_text(node.child_by_field_name("name")?, &self.text);
                let receiver = node
                    .child_by_field_name("receiver")
                    .map(|list| receiver_type(list, &self.text));
                Some(FuncDecl {
                    node,
                    name,
                    receiver,
                    body: node.child_by_field_name("body"),
                })
            })
            .collect()
    }

    /// Locate a pointcut: a plain function when `receiver` is `None`, a
    /// method on the given receiver type otherwise.
    pub fn find_function(&self, name: &str, receiver: Option<&str>) -> Option<FuncDecl<'_>> {
        let wanted = receiver.map(normalize_receiver);
        self.functions()
            .into_iter()
            .find(|f| f.name == name && f.receiver == wanted)
    }

    /// Locate a named type declared at the top level.
    pub fn find_type(&self, name: &str) -> Option<TypeDecl<'_>> {
        let root = self.root()?;
        for decl in children(root).into_iter().filter(|n| n.kind() == "type_declaration") {
            for spec in children(decl) {
                if !matches!(spec.kind(), "type_spec" | "type_alias") {
                    continue;
                }
                let matches_name = spec
                    .child_by_field_name("name")
                    .is_some_and(|n| node_text(n, &self.text) == name);
                if matches_name {
                    return Some(TypeDecl { decl, spec });
                }
            }
        }
        None
    }

    /// Names this file declares at package scope: functions, types,
    /// variables and constants. Methods are excluded.
    pub fn package_scope_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        let Some(root) = self.root() else {
            return names;
        };
        for decl in children(root) {
            match decl.kind() {
                "function_declaration" => {
                    if let Some(name) = decl.child_by_field_name("name") {
                        names.insert(node_text(name, &self.text).to_string());
                    }
                }
                "type_declaration" | "var_declaration" | "const_declaration" => {
                    walk(decl, &mut |node| {
                        if !matches!(node.kind(), "type_spec" | "type_alias" | "var_spec" | "const_spec") {
                            return true;
                        }
                        let mut cursor = node.walk();
                        for name in node.children_by_field_name("name", &mut cursor) {
                            names.insert(node_text(name, &self.text).to_string());
                        }
                        false
                    });
                }
                _ => {}
            }
        }
        names
    }

    /// Every call expression in the file, outermost first.
    pub fn call_expressions(&self) -> Vec<Node<'_>> {
        let mut calls = Vec::new();
        if let Some(root) = self.root() {
            walk(root, &mut |node| {
                if node.kind() == "call_expression" {
                    calls.push(node);
                }
                true
            });
        }
        calls
    }

    /// Make `path` reachable from this file and return the qualifier to use.
    ///
    /// An existing import of the same path is reused with its alias. A new
    /// spec uses `preferred` unless that name is taken, in which case a
    /// numbered variant is chosen.
    pub fn ensure_import(&mut self, path: &str, preferred: &str) -> Result<String, EditConflict> {
        if let Some(existing) = self.imports.local_name_for(path) {
            return Ok(existing);
        }
        let in_use = self.imports.names_in_use();
        let mut alias = preferred.to_string();
        let mut n = 1;
        while in_use.contains(&alias) {
            alias = format!("{preferred}{n}");
            n += 1;
        }
        self.add_import_spec(Some(alias.clone()), path)?;
        Ok(alias)
    }

    /// Blank-import `path` unless the file already imports it in any form.
    pub fn ensure_blank_import(&mut self, path: &str) -> Result<(), EditConflict> {
        if self.imports.is_imported(path) {
            return Ok(());
        }
        self.add_import_spec(Some("_".to_string()), path)
    }

    fn add_import_spec(&mut self, alias: Option<String>, path: &str) -> Result<(), EditConflict> {
        let spec = builder::import_spec(alias.as_deref(), path);
        match self.imports.anchor() {
            Some(ImportAnchor::Group(close)) => {
                let before_close = &self.text[..close];
                let text = if before_close.ends_with('\n') {
                    format!("\t{spec}\n")
                } else {
                    format!("; {spec}")
                };
                self.edits.insert(close, text)?;
            }
            Some(ImportAnchor::AfterDecl(end)) => {
                self.edits.insert(end, format!("\nimport {spec}"))?;
            }
            Some(ImportAnchor::AfterPackage(end)) => {
                self.edits.insert(end, format!("\n\nimport {spec}"))?;
            }
            None => {
                let end = package_clause_end(&self.text);
                self.edits.insert(end, format!("\n\nimport {spec}"))?;
            }
        }
        self.imports.record(alias, path);
        Ok(())
    }

    /// Render the unit with all edits applied.
    pub fn render(&self) -> String {
        self.edits.apply(&self.text)
    }

    /// Re-parse the rendered output, proving the edits produced valid Go.
    pub fn reparse(&self, mode: ParseMode) -> Result<SourceUnit, ParseError> {
        SourceUnit::parse(self.path.clone(), self.render(), mode)
    }
}

/// Normalized receiver type of a method's receiver parameter list.
fn receiver_type(list: Node<'_>, text: &str) -> String {
    named_params(list)
        .into_iter()
        .next()
        .and_then(|param| param.child_by_field_name("type"))
        .map(|ty| normalize_receiver(node_text(ty, text)))
        .unwrap_or_default()
}

/// `* List[T]` → `*List`
pub fn normalize_receiver(ty: &str) -> String {
    let compact: String = ty.chars().filter(|c| !c.is_whitespace()).collect();
    match compact.find('[') {
        Some(idx) => compact[..idx].to_string(),
        None => compact,
    }
}

pub fn node_text<'s>(node: Node<'_>, text: &'s str) -> &'s str {
    &text[node.byte_range()]
}

/// Named children of a node.
pub fn children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

/// Parameter declarations of a `parameter_list`.
pub fn named_params(list: Node<'_>) -> Vec<Node<'_>> {
    children(list)
        .into_iter()
        .filter(|n| matches!(n.kind(), "parameter_declaration" | "variadic_parameter_declaration"))
        .collect()
}

/// Pre-order traversal; `visit` returns `false` to skip a node's children.
pub fn walk<'t, F>(node: Node<'t>, visit: &mut F)
where
    F: FnMut(Node<'t>) -> bool,
{
    if !visit(node) {
        return;
    }
    let mut cursor = node.walk();
    let kids: Vec<Node<'t>> = node.children(&mut cursor).collect();
    for child in kids {
        walk(child, visit);
    }
}

fn first_error(root: Node<'_>) -> Option<Node<'_>> {
    if !root.has_error() {
        return None;
    }
    let mut found = None;
    walk(root, &mut |node| {
        if found.is_some() {
            return false;
        }
        if node.is_error() || node.is_missing() {
            found = Some(node);
            return false;
        }
        node.has_error()
    });
    found.or(Some(root))
}

fn syntax_error(path: &Path, text: &str, node: Node<'_>) -> ParseError {
    let start = node.start_position();
    let snippet: String = node_text(node, text).chars().take(40).collect();
    ParseError::Syntax {
        file: path.to_path_buf(),
        line: start.row + 1,
        column: start.column + 1,
        snippet: if snippet.is_empty() {
            node.kind().to_string()
        } else {
            snippet
        },
    }
}

/// Read the package name without building a syntax tree: skip whitespace
/// and comments, then expect `package <ident>`.
fn scan_package_clause(text: &str) -> Option<String> {
    let rest = skip_trivia(text);
    let rest = rest.strip_prefix("package")?;
    if !rest.starts_with(|c: char| c.is_whitespace() || c == '/') {
        return None;
    }
    let rest = skip_trivia(rest);
    let name: String = rest
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        None
    } else {
        Some(name)
    }
}

fn skip_trivia(mut text: &str) -> &str {
    loop {
        let trimmed = text.trim_start();
        if let Some(rest) = trimmed.strip_prefix("//") {
            text = rest.find('\n').map_or("", |i| &rest[i..]);
        } else if let Some(rest) = trimmed.strip_prefix("/*") {
            text = rest.find("*/").map_or("", |i| &rest[i + 2..]);
        } else {
            return trimmed;
        }
    }
}

fn package_clause_end(text: &str) -> usize {
    let start = text.len() - skip_trivia(text).len();
    text[start..].find('\n').map_or(text.len(), |i| start + i)
}
