// Go code construction for injected snippets.
// Synthesized code is assembled from these nodes and rendered through
// `ToSource`, so the weaver never concatenates statement text by hand.

/// Trait for nodes that can render themselves as Go source
pub trait ToSource {
    fn to_source(&self) -> String;
}

#[derive(Debug, Clone, PartialEq)]
pub enum GoExpr {
    Ident(String),
    StringLit(String),
    IntLit(i64),
    Nil,
    /// Expression or type text taken verbatim from the woven file.
    Verbatim(String),
    Selector {
        operand: Box<GoExpr>,
        field: String,
    },
    Call {
        func: Box<GoExpr>,
        args: Vec<GoExpr>,
    },
    Index {
        expr: Box<GoExpr>,
        index: Box<GoExpr>,
    },
    AddressOf(Box<GoExpr>),
    Deref(Box<GoExpr>),
    TypeAssert {
        expr: Box<GoExpr>,
        ty: String,
    },
    /// `ty{elems...}`
    Composite {
        ty: String,
        elems: Vec<GoExpr>,
    },
    /// `ty{key: value, ...}`
    KeyedComposite {
        ty: String,
        fields: Vec<(String, GoExpr)>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum GoStmt {
    Expr(GoExpr),
    /// `lhs = rhs`
    Assign {
        lhs: Vec<GoExpr>,
        rhs: Vec<GoExpr>,
    },
    /// `names := rhs`
    Define {
        names: Vec<String>,
        rhs: Vec<GoExpr>,
    },
    Return(Vec<GoExpr>),
    If {
        cond: GoExpr,
        then: Vec<GoStmt>,
    },
    Switch {
        tag: GoExpr,
        cases: Vec<(GoExpr, Vec<GoStmt>)>,
    },
    /// `defer call`
    Defer(GoExpr),
}

/// A top-level function declaration. A `None` body renders a bodyless
/// declaration, used together with `//go:linkname` directives.
#[derive(Debug, Clone, PartialEq)]
pub struct GoFunc {
    pub directives: Vec<String>,
    pub receiver: Option<(String, String)>,
    pub name: String,
    pub params: Vec<(String, String)>,
    pub results: Vec<String>,
    pub body: Option<Vec<GoStmt>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GoStruct {
    pub name: String,
    pub fields: Vec<(String, String)>,
}

/// Named interface type; `methods` are method specs such as
/// `GetParam(idx int) interface{}`.
#[derive(Debug, Clone, PartialEq)]
pub struct GoInterface {
    pub name: String,
    pub methods: Vec<String>,
}

pub fn ident(name: impl Into<String>) -> GoExpr {
    GoExpr::Ident(name.into())
}

pub fn string_lit(value: impl Into<String>) -> GoExpr {
    GoExpr::StringLit(value.into())
}

pub fn int_lit(value: i64) -> GoExpr {
    GoExpr::IntLit(value)
}

pub fn verbatim(text: impl Into<String>) -> GoExpr {
    GoExpr::Verbatim(text.into())
}

pub fn selector(operand: GoExpr, field: impl Into<String>) -> GoExpr {
    GoExpr::Selector {
        operand: Box::new(operand),
        field: field.into(),
    }
}

pub fn call(func: GoExpr, args: Vec<GoExpr>) -> GoExpr {
    GoExpr::Call {
        func: Box::new(func),
        args,
    }
}

pub fn index(expr: GoExpr, idx: GoExpr) -> GoExpr {
    GoExpr::Index {
        expr: Box::new(expr),
        index: Box::new(idx),
    }
}

pub fn address_of(expr: GoExpr) -> GoExpr {
    GoExpr::AddressOf(Box::new(expr))
}

pub fn deref(expr: GoExpr) -> GoExpr {
    GoExpr::Deref(Box::new(expr))
}

pub fn type_assert(expr: GoExpr, ty: impl Into<String>) -> GoExpr {
    GoExpr::TypeAssert {
        expr: Box::new(expr),
        ty: ty.into(),
    }
}

pub fn composite(ty: impl Into<String>, elems: Vec<GoExpr>) -> GoExpr {
    GoExpr::Composite {
        ty: ty.into(),
        elems,
    }
}

pub fn keyed_composite(ty: impl Into<String>, fields: Vec<(String, GoExpr)>) -> GoExpr {
    GoExpr::KeyedComposite {
        ty: ty.into(),
        fields,
    }
}

pub fn expr_stmt(expr: GoExpr) -> GoStmt {
    GoStmt::Expr(expr)
}

pub fn assign(lhs: Vec<GoExpr>, rhs: Vec<GoExpr>) -> GoStmt {
    GoStmt::Assign { lhs, rhs }
}

pub fn define(names: Vec<String>, rhs: Vec<GoExpr>) -> GoStmt {
    GoStmt::Define { names, rhs }
}

pub fn ret(values: Vec<GoExpr>) -> GoStmt {
    GoStmt::Return(values)
}

pub fn if_stmt(cond: GoExpr, then: Vec<GoStmt>) -> GoStmt {
    GoStmt::If { cond, then }
}

pub fn defer_stmt(call: GoExpr) -> GoStmt {
    GoStmt::Defer(call)
}

/// Render an import spec line (without the `import` keyword).
pub fn import_spec(alias: Option<&str>, path: &str) -> String {
    match alias {
        Some(alias) => format!("{alias} {}", string_lit(path).to_source()),
        None => string_lit(path).to_source(),
    }
}

/// Go interpreted string literal for `value`.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn join(exprs: &[GoExpr]) -> String {
    exprs
        .iter()
        .map(ToSource::to_source)
        .collect::<Vec<_>>()
        .join(", ")
}

fn needs_parens(expr: &GoExpr) -> bool {
    matches!(expr, GoExpr::AddressOf(_) | GoExpr::Deref(_))
}

fn operand_source(expr: &GoExpr) -> String {
    if needs_parens(expr) {
        format!("({})", expr.to_source())
    } else {
        expr.to_source()
    }
}

impl ToSource for GoExpr {
    fn to_source(&self) -> String {
        match self {
            GoExpr::Ident(name) => name.clone(),
            GoExpr::StringLit(value) => quote(value),
            GoExpr::IntLit(value) => value.to_string(),
            GoExpr::Nil => "nil".to_string(),
            GoExpr::Verbatim(text) => text.clone(),
            GoExpr::Selector { operand, field } => format!("{}.{field}", operand_source(operand)),
            GoExpr::Call { func, args } => format!("{}({})", operand_source(func), join(args)),
            GoExpr::Index { expr, index } => {
                format!("{}[{}]", operand_source(expr), index.to_source())
            }
            GoExpr::AddressOf(expr) => format!("&{}", expr.to_source()),
            GoExpr::Deref(expr) => format!("*{}", operand_source(expr)),
            GoExpr::TypeAssert { expr, ty } => format!("{}.({ty})", operand_source(expr)),
            GoExpr::Composite { ty, elems } => format!("{ty}{{{}}}", join(elems)),
            GoExpr::KeyedComposite { ty, fields } => {
                let fields = fields
                    .iter()
                    .map(|(key, value)| format!("{key}: {}", value.to_source()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{ty}{{{fields}}}")
            }
        }
    }
}

impl GoStmt {
    /// Render with `depth` leading tabs on every line.
    pub fn render(&self, depth: usize) -> String {
        let pad = "\t".repeat(depth);
        match self {
            GoStmt::Expr(expr) => format!("{pad}{}", expr.to_source()),
            GoStmt::Assign { lhs, rhs } => format!("{pad}{} = {}", join(lhs), join(rhs)),
            GoStmt::Define { names, rhs } => {
                format!("{pad}{} := {}", names.join(", "), join(rhs))
            }
            GoStmt::Return(values) if values.is_empty() => format!("{pad}return"),
            GoStmt::Return(values) => format!("{pad}return {}", join(values)),
            GoStmt::If { cond, then } => {
                format!("{pad}if {} {{\n{}{pad}}}", cond.to_source(), render_body(then, depth + 1))
            }
            GoStmt::Switch { tag, cases } => {
                let mut out = format!("{pad}switch {} {{\n", tag.to_source());
                for (value, body) in cases {
                    out.push_str(&format!("{pad}case {}:\n", value.to_source()));
                    out.push_str(&render_body(body, depth + 1));
                }
                out.push_str(&format!("{pad}}}"));
                out
            }
            GoStmt::Defer(call) => format!("{pad}defer {}", call.to_source()),
        }
    }
}

fn render_body(stmts: &[GoStmt], depth: usize) -> String {
    stmts
        .iter()
        .map(|s| format!("{}\n", s.render(depth)))
        .collect()
}

impl ToSource for GoStmt {
    fn to_source(&self) -> String {
        self.render(0)
    }
}

impl ToSource for GoFunc {
    fn to_source(&self) -> String {
        let mut out = String::new();
        for directive in &self.directives {
            out.push_str(directive);
            out.push('\n');
        }
        out.push_str("func ");
        if let Some((name, ty)) = &self.receiver {
            out.push_str(&format!("({name} {ty}) "));
        }
        let params = self
            .params
            .iter()
            .map(|(name, ty)| format!("{name} {ty}"))
            .collect::<Vec<_>>()
            .join(", ");
        out.push_str(&format!("{}({params})", self.name));
        match self.results.len() {
            0 => {}
            1 => out.push_str(&format!(" {}", self.results[0])),
            _ => out.push_str(&format!(" ({})", self.results.join(", "))),
        }
        match &self.body {
            None => {}
            Some(body) if body.len() == 1 && !matches!(body[0], GoStmt::If { .. } | GoStmt::Switch { .. }) => {
                out.push_str(&format!(" {{ {} }}", body[0].render(0)));
            }
            Some(body) => {
                out.push_str(" {\n");
                out.push_str(&render_body(body, 1));
                out.push('}');
            }
        }
        out.push('\n');
        out
    }
}

impl ToSource for GoStruct {
    fn to_source(&self) -> String {
        let width = self.fields.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
        let mut out = format!("type {} struct {{\n", self.name);
        for (name, ty) in &self.fields {
            out.push_str(&format!("\t{name:<width$} {ty}\n"));
        }
        out.push_str("}\n");
        out
    }
}

impl ToSource for GoInterface {
    fn to_source(&self) -> String {
        let mut out = format!("type {} interface {{\n", self.name);
        for method in &self.methods {
            out.push_str(&format!("\t{method}\n"));
        }
        out.push_str("}\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expression_builders() {
        let expr = deref(type_assert(
            index(selector(ident("c"), "params"), int_lit(0)),
            "*int",
        ));
        assert_eq!(expr.to_source(), "*c.params[0].(*int)");

        let ptr = address_of(ident("x"));
        assert_eq!(selector(ptr, "f").to_source(), "(&x).f");
    }

    #[test]
    fn test_composite_literals() {
        let lit = composite("[]interface{}", vec![address_of(ident("a")), address_of(ident("b"))]);
        assert_eq!(lit.to_source(), "[]interface{}{&a, &b}");

        let keyed = keyed_composite("&ctx", vec![("funcName".into(), string_lit("Get"))]);
        assert_eq!(keyed.to_source(), "&ctx{funcName: \"Get\"}");
    }

    #[test]
    fn test_if_renders_nested_block() {
        let stmt = if_stmt(
            selector(ident("ctx"), "skipCall"),
            vec![expr_stmt(call(ident("after"), vec![ident("ctx")])), ret(vec![])],
        );
        assert_eq!(stmt.render(1), "\tif ctx.skipCall {\n\t\tafter(ctx)\n\t\treturn\n\t}");
    }

    #[test]
    fn test_defer_renders_call() {
        let stmt = defer_stmt(call(ident("after"), vec![ident("ctx")]));
        assert_eq!(stmt.render(1), "\tdefer after(ctx)");
    }

    #[test]
    fn test_bodyless_func_with_directive() {
        let func = GoFunc {
            directives: vec!["//go:linkname hook pkg.Hook".into()],
            receiver: None,
            name: "hook".into(),
            params: vec![("ctx".into(), "interface{}".into())],
            results: vec![],
            body: None,
        };
        assert_eq!(func.to_source(), "//go:linkname hook pkg.Hook\nfunc hook(ctx interface{})\n");
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("a\"b\\c\n"), "\"a\\\"b\\\\c\\n\"");
    }

    #[test]
    fn test_import_spec() {
        assert_eq!(import_spec(Some("_"), "unsafe"), "_ \"unsafe\"");
        assert_eq!(import_spec(None, "fmt"), "\"fmt\"");
    }
}
