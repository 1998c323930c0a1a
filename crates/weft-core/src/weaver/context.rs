//! Synthesized declarations for function advice: the per-rule hook context
//! type, the shared hook context interface and the linkname'd hook stubs.
//!
//! The context holds pointers to the woven function's parameters (receiver
//! first) and named results, so hooks read and write the live variables.

use crate::source::builder::{
    assign, call, define, defer_stmt, deref, expr_stmt, ident, index, int_lit, ret, selector,
    type_assert,
};
use crate::source::{GoExpr, GoFunc, GoInterface, GoStmt, GoStruct, ToSource};

/// Name of the per-file interface every hook receives.
pub const HOOK_CONTEXT: &str = "__weftHookContext";

/// A named variable of the woven function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub name: String,
    pub ty: String,
}

pub fn hook_context_interface() -> String {
    GoInterface {
        name: HOOK_CONTEXT.to_string(),
        methods: [
            "SetSkipCall(skip bool)",
            "IsSkipCall() bool",
            "SetData(data interface{})",
            "GetData() interface{}",
            "GetParam(idx int) interface{}",
            "SetParam(idx int, val interface{})",
            "GetReturnVal(idx int) interface{}",
            "SetReturnVal(idx int, val interface{})",
            "GetFuncName() string",
            "GetPackageName() string",
        ]
        .iter()
        .map(|m| m.to_string())
        .collect(),
    }
    .to_source()
}

/// Bodyless hook declaration bound to `<path>.<hook>` at link time.
pub fn hook_stub(local: &str, path: &str, hook: &str) -> String {
    GoFunc {
        directives: vec![format!("//go:linkname {local} {path}.{hook}")],
        receiver: None,
        name: local.to_string(),
        params: vec![("ctx".to_string(), HOOK_CONTEXT.to_string())],
        results: Vec::new(),
        body: None,
    }
    .to_source()
}

fn method(type_name: &str, name: &str, params: &[(&str, &str)], results: &[&str], body: Vec<GoStmt>) -> String {
    GoFunc {
        directives: Vec::new(),
        receiver: Some(("c".to_string(), format!("*{type_name}"))),
        name: name.to_string(),
        params: params
            .iter()
            .map(|(n, t)| (n.to_string(), t.to_string()))
            .collect(),
        results: results.iter().map(|r| r.to_string()).collect(),
        body: Some(body),
    }
    .to_source()
}

fn field(name: &str) -> GoExpr {
    selector(ident("c"), name)
}

/// `switch idx { case i: ... }` over the slots of `list`.
fn getter(list: &str, slots: &[Slot]) -> Vec<GoStmt> {
    let cases = slots
        .iter()
        .enumerate()
        .map(|(i, slot)| {
            let slot_ptr = type_assert(index(field(list), int_lit(i as i64)), format!("*{}", slot.ty));
            (int_lit(i as i64), vec![ret(vec![deref(slot_ptr)])])
        })
        .collect();
    vec![
        GoStmt::Switch {
            tag: ident("idx"),
            cases,
        },
        ret(vec![GoExpr::Nil]),
    ]
}

fn setter(list: &str, slots: &[Slot]) -> Vec<GoStmt> {
    let cases = slots
        .iter()
        .enumerate()
        .map(|(i, slot)| {
            let slot_ptr = type_assert(index(field(list), int_lit(i as i64)), format!("*{}", slot.ty));
            (
                int_lit(i as i64),
                vec![
                    define(
                        vec!["v".to_string(), "_".to_string()],
                        vec![type_assert(ident("val"), slot.ty.clone())],
                    ),
                    assign(vec![deref(slot_ptr)], vec![ident("v")]),
                ],
            )
        })
        .collect();
    vec![GoStmt::Switch {
        tag: ident("idx"),
        cases,
    }]
}

/// Struct type plus methods implementing the hook context for one rule.
pub fn context_type(type_name: &str, params: &[Slot], results: &[Slot]) -> String {
    let mut out = GoStruct {
        name: type_name.to_string(),
        fields: [
            ("params", "[]interface{}"),
            ("returnVals", "[]interface{}"),
            ("skipCall", "bool"),
            ("data", "interface{}"),
            ("funcName", "string"),
            ("packageName", "string"),
        ]
        .iter()
        .map(|(n, t)| (n.to_string(), t.to_string()))
        .collect(),
    }
    .to_source();

    let methods = [
        method(type_name, "SetSkipCall", &[("skip", "bool")], &[], vec![assign(vec![field("skipCall")], vec![ident("skip")])]),
        method(type_name, "IsSkipCall", &[], &["bool"], vec![ret(vec![field("skipCall")])]),
        method(type_name, "SetData", &[("data", "interface{}")], &[], vec![assign(vec![field("data")], vec![ident("data")])]),
        method(type_name, "GetData", &[], &["interface{}"], vec![ret(vec![field("data")])]),
        method(type_name, "GetParam", &[("idx", "int")], &["interface{}"], getter("params", params)),
        method(type_name, "SetParam", &[("idx", "int"), ("val", "interface{}")], &[], setter("params", params)),
        method(type_name, "GetReturnVal", &[("idx", "int")], &["interface{}"], getter("returnVals", results)),
        method(type_name, "SetReturnVal", &[("idx", "int"), ("val", "interface{}")], &[], setter("returnVals", results)),
        method(type_name, "GetFuncName", &[], &["string"], vec![ret(vec![field("funcName")])]),
        method(type_name, "GetPackageName", &[], &["string"], vec![ret(vec![field("packageName")])]),
    ];
    for m in methods {
        out.push('\n');
        out.push_str(&m);
    }
    out
}

/// `<hook>(<ctx>)`
pub fn hook_call(hook: &str, ctx_var: &str) -> GoStmt {
    expr_stmt(call(ident(hook), vec![ident(ctx_var)]))
}

/// `defer <hook>(<ctx>)`; runs after the results are assigned on every
/// return path, so the hook sees and can replace the final results.
pub fn deferred_hook_call(hook: &str, ctx_var: &str) -> GoStmt {
    defer_stmt(call(ident(hook), vec![ident(ctx_var)]))
}
