/*!
# Function Advice

Weaves `func` and `raw` rules into a function body.

All rules sharing one pointcut are woven in a single pass so their code
composes: entry code runs in load order, after hooks in reverse load order.
A rule's after hook is deferred right after its skip check:

```go
__weft_ctx_r := &__weftCtx_r{params: ..., returnVals: []interface{}{&err}, ...}
__weft_before_r(__weft_ctx_r)
if __weft_ctx_r.skipCall {
	__weft_after_r(__weft_ctx_r)
	return
}
defer __weft_after_r(__weft_ctx_r)
```

The deferred call runs once the results are assigned, on every return path,
so the hook reads (and may replace) the values actually returned even when a
result name is shadowed inside the body. Return statements are untouched.
*/

use std::time::Instant;

use tracing::debug;
use tree_sitter::Node;

use super::context::{self as hooks, Slot};
use super::{rule_ident, FileState, PackageState, WeaveContext, WeaveError, WeaveSummary};
use crate::rules::{FuncRule, MatchedRules, Rule, RuleKind};
use crate::source::builder::{
    address_of, composite, define, expr_stmt, ident, if_stmt, keyed_composite, ret, selector,
    string_lit, verbatim,
};
use crate::source::{named_params, node_text, SourceUnit};

/// Span rewrite needed to give an unnamed or blank variable a name.
#[derive(Debug, Clone)]
struct Rename {
    start: usize,
    end: usize,
    text: String,
}

/// Everything the weave needs from one function, collected before any
/// edit is made.
#[derive(Debug, Clone)]
struct FunctionPlan {
    name: String,
    generic: bool,
    params: Vec<Slot>,
    results: Vec<Slot>,
    renames: Vec<Rename>,
    body_open: usize,
    newline_after_open: bool,
}

impl FunctionPlan {
    /// `None` when the function is not declared in this file.
    fn analyze(unit: &SourceUnit, func: &str, recv: Option<&str>) -> Option<Result<Self, String>> {
        let decl = unit.find_function(func, recv)?;
        Some(Self::from_decl(unit, decl.node, decl.body))
    }

    fn from_decl(unit: &SourceUnit, node: Node<'_>, body: Option<Node<'_>>) -> Result<Self, String> {
        let text = unit.text();
        let Some(body) = body else {
            return Err("function has no body".to_string());
        };

        let mut generic = node.child_by_field_name("type_parameters").is_some();
        let mut params = Vec::new();
        let mut renames = Vec::new();

        if let Some(receiver) = node.child_by_field_name("receiver") {
            let slots = collect_slots(receiver, text, &mut renames, |_| "__weft_recv".to_string());
            generic |= slots.iter().any(|s| s.ty.contains('['));
            params.extend(slots);
        }
        if let Some(list) = node.child_by_field_name("parameters") {
            params.extend(collect_slots(list, text, &mut renames, |i| format!("__weft_param{i}")));
        }

        let results = match node.child_by_field_name("result") {
            None => Vec::new(),
            Some(list) if list.kind() == "parameter_list" => {
                collect_slots(list, text, &mut renames, |i| format!("__weft_ret{i}"))
            }
            Some(single) => {
                let ty = node_text(single, text).to_string();
                renames.push(Rename {
                    start: single.start_byte(),
                    end: single.end_byte(),
                    text: format!("(__weft_ret0 {ty})"),
                });
                vec![Slot {
                    name: "__weft_ret0".to_string(),
                    ty,
                }]
            }
        };

        let body_open = body.start_byte() + 1;

        Ok(Self {
            name: func_name(node, text),
            generic,
            params,
            results,
            renames,
            body_open,
            newline_after_open: text[body_open..].starts_with(['\n', '\r']),
        })
    }
}

fn func_name(node: Node<'_>, text: &str) -> String {
    node.child_by_field_name("name")
        .map(|n| node_text(n, text).to_string())
        .unwrap_or_default()
}

/// Slots of a parameter list, naming unnamed and `_` entries with `fresh`.
fn collect_slots<F>(list: Node<'_>, text: &str, renames: &mut Vec<Rename>, fresh: F) -> Vec<Slot>
where
    F: Fn(usize) -> String,
{
    let mut slots = Vec::new();
    for decl in named_params(list) {
        let Some(ty_node) = decl.child_by_field_name("type") else {
            continue;
        };
        let raw_ty = node_text(ty_node, text);
        let ty = if decl.kind() == "variadic_parameter_declaration" {
            format!("[]{raw_ty}")
        } else {
            raw_ty.to_string()
        };

        let mut cursor = decl.walk();
        let names: Vec<Node<'_>> = decl.children_by_field_name("name", &mut cursor).collect();
        if names.is_empty() {
            let name = fresh(slots.len());
            renames.push(Rename {
                start: decl.start_byte(),
                end: decl.start_byte(),
                text: format!("{name} "),
            });
            slots.push(Slot { name, ty });
            continue;
        }
        for name_node in names {
            let mut name = node_text(name_node, text).to_string();
            if name == "_" {
                name = fresh(slots.len());
                renames.push(Rename {
                    start: name_node.start_byte(),
                    end: name_node.end_byte(),
                    text: name.clone(),
                });
            }
            slots.push(Slot {
                name,
                ty: ty.clone(),
            });
        }
    }
    slots
}

pub(crate) fn weave_functions(
    unit: &mut SourceUnit,
    matched: &MatchedRules<'_>,
    context: &WeaveContext,
    state: &mut FileState,
    package: &mut PackageState,
    summary: &mut WeaveSummary,
) -> Result<(), WeaveError> {
    for (func, recv) in matched.pointcuts() {
        let rules = matched.func_rules(&func, recv.as_deref());
        let Some(first) = rules.first().copied() else {
            continue;
        };
        let started = Instant::now();
        let plan = match FunctionPlan::analyze(unit, &func, recv.as_deref()) {
            None => continue,
            Some(Ok(plan)) => plan,
            Some(Err(message)) => return Err(context.unsupported(first, message)),
        };

        weave_function(unit, &plan, &rules, context, state, package)?;
        for rule in &rules {
            state.applied(&rule.name);
            summary.record(&rule.name, 1, started);
        }
        debug!(
            function = %plan.name,
            receiver = recv.as_deref().unwrap_or(""),
            rules = rules.len(),
            "Wove function advice"
        );
    }
    Ok(())
}

fn ctx_var(rule: &Rule) -> String {
    format!("__weft_ctx_{}", rule_ident(rule))
}

fn ctx_type(rule: &Rule) -> String {
    format!("__weftCtx_{}", rule_ident(rule))
}

fn before_hook(rule: &Rule) -> String {
    format!("__weft_before_{}", rule_ident(rule))
}

fn after_hook(rule: &Rule) -> String {
    format!("__weft_after_{}", rule_ident(rule))
}

fn weave_function(
    unit: &mut SourceUnit,
    plan: &FunctionPlan,
    rules: &[&Rule],
    context: &WeaveContext,
    state: &mut FileState,
    package: &mut PackageState,
) -> Result<(), WeaveError> {
    let advice: Vec<(&Rule, &FuncRule)> = rules
        .iter()
        .filter_map(|rule| match &rule.kind {
            RuleKind::Func(f) => Some((*rule, f)),
            _ => None,
        })
        .collect();

    if let Some((rule, _)) = advice.first() {
        if plan.generic {
            return Err(context.unsupported(rule, format!("generic function `{}` cannot carry advice", plan.name)));
        }
        for rename in &plan.renames {
            unit.replace(rename.start, rename.end, rename.text.clone())
                .map_err(context.conflict(rule))?;
        }
        unit.ensure_blank_import("unsafe").map_err(context.conflict(rule))?;
    }

    let package_name = unit.package_name().to_string();

    // entry code, in load order
    let mut entry: Vec<String> = Vec::new();
    let mut declarations = String::new();
    for rule in rules {
        match &rule.kind {
            RuleKind::Func(f) => {
                let ctx = ctx_var(rule);
                let fields = vec![
                    (
                        "params".to_string(),
                        composite("[]interface{}", plan.params.iter().map(|s| address_of(ident(&s.name))).collect()),
                    ),
                    (
                        "returnVals".to_string(),
                        composite("[]interface{}", plan.results.iter().map(|s| address_of(ident(&s.name))).collect()),
                    ),
                    ("funcName".to_string(), string_lit(&plan.name)),
                    ("packageName".to_string(), string_lit(&package_name)),
                ];
                entry.push(
                    define(vec![ctx.clone()], vec![keyed_composite(format!("&{}", ctx_type(rule)), fields)]).render(1),
                );

                if f.before.is_some() {
                    entry.push(hooks::hook_call(&before_hook(rule), &ctx).render(1));
                    // earlier rules' after hooks are already deferred
                    let mut skip = Vec::new();
                    if f.after.is_some() {
                        skip.push(hooks::hook_call(&after_hook(rule), &ctx));
                    }
                    skip.push(ret(Vec::new()));
                    entry.push(if_stmt(selector(ident(&ctx), "skipCall"), skip).render(1));
                }
                if f.after.is_some() {
                    entry.push(hooks::deferred_hook_call(&after_hook(rule), &ctx).render(1));
                }

                declarations.push('\n');
                declarations.push_str(&hooks::context_type(&ctx_type(rule), &plan.params, &plan.results));
                for (local, hook) in [(before_hook(rule), &f.before), (after_hook(rule), &f.after)] {
                    if let Some(hook) = hook {
                        declarations.push('\n');
                        declarations.push_str(&hooks::hook_stub(&local, &f.path, hook));
                    }
                }
            }
            RuleKind::Raw(raw) => {
                for line in raw.raw.trim().lines() {
                    entry.push(expr_stmt(verbatim(line.trim_end())).render(1));
                }
            }
            _ => {}
        }
    }

    if !advice.is_empty() {
        // Go declarations are package-wide: one interface per package
        if !package.hook_context_declared {
            declarations.insert_str(0, &format!("\n{}", hooks::hook_context_interface()));
            package.hook_context_declared = true;
        }
        state.uses_linkname = true;
    }

    if !entry.is_empty() {
        let tail = if plan.newline_after_open { "" } else { "\n" };
        let text = format!("\n{}{tail}", entry.join("\n"));
        unit.insert(plan.body_open, text)
            .map_err(|e| context.conflict(rules[0])(e))?;
    }

    if !declarations.is_empty() {
        let end = unit.text().len();
        let lead = if unit.text().ends_with('\n') { "" } else { "\n" };
        unit.insert(end, format!("{lead}{declarations}"))
            .map_err(|e| context.conflict(rules[0])(e))?;
    }
    Ok(())
}
