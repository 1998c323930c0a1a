//! Call-site wrapper templates.
//!
//! A template is a Go expression with exactly one `{{ . }}` placeholder,
//! e.g. `trace.Wrap(ctx, {{ . }})`. It is compiled once at load time into
//! text segments, import-alias references and the hole, so rendering per
//! call-site is a plain concatenation with the file's own aliases.

use std::sync::OnceLock;

use indexmap::IndexMap;
use regex::Regex;

use crate::source::{self, node_text, ParseMode, SourceUnit};

const HOLE_IDENT: &str = "__weft_call";
const PROLOGUE: &str = "package p\n\nvar _ = ";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    /// Reference to one of the rule's declared imports, by template alias.
    Alias(String),
    Hole,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{\{\s*\.\s*\}\}").expect("placeholder pattern"))
}

impl Template {
    /// Compile `source` against the rule's declared imports (alias → path).
    ///
    /// When the outermost expression calls a bare identifier and the rule
    /// declares exactly one import, the callee is qualified with that import:
    /// `wrap({{ . }})` with `{wrap: pkg/wrap}` renders `wrap.wrap(...)`.
    pub fn compile(source: &str, imports: &IndexMap<String, String>) -> Result<Self, String> {
        let holes: Vec<_> = placeholder().find_iter(source).collect();
        let hole = match holes.as_slice() {
            [one] => *one,
            [] => return Err(format!("template {source:?} has no {{{{ . }}}} placeholder")),
            _ => {
                return Err(format!(
                    "template {source:?} has {} placeholders, expected exactly one",
                    holes.len()
                ))
            }
        };

        let expr_text = format!("{}{HOLE_IDENT}{}", &source[..hole.start()], &source[hole.end()..]);
        let program = format!("{PROLOGUE}{expr_text}\n");
        let unit = SourceUnit::parse("template.go", program, ParseMode::SkipObjectResolution)
            .map_err(|e| format!("template {source:?} is not a Go expression: {e}"))?;
        let root = unit
            .root()
            .ok_or_else(|| format!("template {source:?} did not parse"))?;

        let expr = single_expression(root)
            .ok_or_else(|| format!("template {source:?} must be a single Go expression"))?;

        let base = PROLOGUE.len();
        let mut splits: Vec<(usize, usize, Split)> = Vec::new();
        let mut hole_count = 0;
        source::walk(expr, &mut |node| {
            match node.kind() {
                "identifier" if node_text(node, unit.text()) == HOLE_IDENT => {
                    hole_count += 1;
                    splits.push((node.start_byte() - base, node.end_byte() - base, Split::Hole));
                }
                "selector_expression" => {
                    if let Some(operand) = node.child_by_field_name("operand") {
                        let name = node_text(operand, unit.text());
                        if operand.kind() == "identifier" && imports.contains_key(name) {
                            splits.push((
                                operand.start_byte() - base,
                                operand.end_byte() - base,
                                Split::Alias(name.to_string()),
                            ));
                        }
                    }
                }
                _ => {}
            }
            true
        });
        if hole_count != 1 {
            return Err(format!("template {source:?} must use its placeholder as an expression"));
        }

        if imports.len() == 1 && expr.kind() == "call_expression" {
            if let Some(callee) = expr.child_by_field_name("function") {
                let name = node_text(callee, unit.text());
                if callee.kind() == "identifier" && name != HOLE_IDENT {
                    if let Some(alias) = imports.keys().next() {
                        let at = callee.start_byte() - base;
                        splits.push((at, at, Split::Qualify(alias.clone())));
                    }
                }
            }
        }

        splits.sort_by_key(|(start, end, _)| (*start, *end));
        let mut segments = Vec::new();
        let mut cursor = 0;
        for (start, end, split) in splits {
            if start > cursor {
                segments.push(Segment::Text(expr_text[cursor..start].to_string()));
            }
            match split {
                Split::Hole => segments.push(Segment::Hole),
                Split::Alias(alias) => segments.push(Segment::Alias(alias)),
                Split::Qualify(alias) => {
                    segments.push(Segment::Alias(alias));
                    segments.push(Segment::Text(".".to_string()));
                }
            }
            cursor = end;
        }
        if cursor < expr_text.len() {
            segments.push(Segment::Text(expr_text[cursor..].to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Template aliases this template references.
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Alias(alias) => Some(alias.as_str()),
            _ => None,
        })
    }

    /// Substitute `call` into the hole, mapping template aliases to the
    /// qualifiers the file actually uses.
    pub fn render<F>(&self, call: &str, qualifier: F) -> String
    where
        F: Fn(&str) -> String,
    {
        let mut out = String::with_capacity(self.source.len() + call.len());
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Alias(alias) => out.push_str(&qualifier(alias)),
                Segment::Hole => out.push_str(call),
            }
        }
        out.trim().to_string()
    }
}

enum Split {
    Hole,
    Alias(String),
    Qualify(String),
}

/// The lone expression of `var _ = <expr>`.
fn single_expression(root: tree_sitter::Node<'_>) -> Option<tree_sitter::Node<'_>> {
    let decl = source::children(root)
        .into_iter()
        .find(|n| n.kind() == "var_declaration")?;
    let spec = source::children(decl).into_iter().find(|n| n.kind() == "var_spec")?;
    let values = spec.child_by_field_name("value")?;
    match source::children(values).as_slice() {
        [expr] => Some(*expr),
        _ => None,
    }
}
