//! Call-site wrapping.
//!
//! Call expressions are matched through the file's import table, so
//! `nethttp.Get(u)` under `import nethttp "net/http"` and `Get(u)` under a
//! dot import both match `net/http.Get`, unless the file declares its own
//! package-level `Get`. Sites are wrapped innermost first;
//! wrapping an outer call folds the already-wrapped inner text into it.

use std::time::Instant;

use tracing::debug;

use super::{FileState, WeaveContext, WeaveError, WeaveSummary};
use crate::rules::MatchedRules;
use crate::source::{node_text, SourceUnit};

#[derive(Debug)]
struct CallSite {
    start: usize,
    end: usize,
    /// Indices into the matched call rules, in load order.
    rules: Vec<usize>,
}

pub(crate) fn wrap_calls(
    unit: &mut SourceUnit,
    matched: &MatchedRules<'_>,
    context: &WeaveContext,
    state: &mut FileState,
    summary: &mut WeaveSummary,
) -> Result<(), WeaveError> {
    let call_rules = matched.all_call_rules();
    if call_rules.is_empty() {
        return Ok(());
    }

    let mut sites = Vec::new();
    {
        let text = unit.text();
        let imports = unit.imports();
        let dot_imports: Vec<&str> = imports.dot_imports().collect();
        // a package-level declaration shadows a dot-imported name
        let declared = if dot_imports.is_empty() {
            Default::default()
        } else {
            unit.package_scope_names()
        };

        for call in unit.call_expressions() {
            let Some(callee) = call.child_by_field_name("function") else {
                continue;
            };
            let (paths, func): (Vec<&str>, &str) = match callee.kind() {
                "selector_expression" => {
                    let (Some(operand), Some(field)) = (
                        callee.child_by_field_name("operand"),
                        callee.child_by_field_name("field"),
                    ) else {
                        continue;
                    };
                    if operand.kind() != "identifier" {
                        continue;
                    }
                    match imports.resolve(node_text(operand, text)) {
                        Some(path) => (vec![path], node_text(field, text)),
                        None => continue,
                    }
                }
                "identifier" if !dot_imports.is_empty() => {
                    let name = node_text(callee, text);
                    if declared.contains(name) {
                        continue;
                    }
                    (dot_imports.clone(), name)
                }
                _ => continue,
            };

            let rules: Vec<usize> = call_rules
                .iter()
                .enumerate()
                .filter(|(_, (_, rule))| rule.func == func && paths.contains(&rule.package.as_str()))
                .map(|(idx, _)| idx)
                .collect();
            if rules.is_empty() {
                continue;
            }

            // arguments of go/defer are evaluated eagerly; a wrapper would
            // move the call out of the spawned or deferred function
            if call
                .parent()
                .is_some_and(|p| matches!(p.kind(), "go_statement" | "defer_statement"))
            {
                debug!(line = unit.line_of(call.start_byte()), "Skipping go/defer call site");
                continue;
            }

            sites.push(CallSite {
                start: call.start_byte(),
                end: call.end_byte(),
                rules,
            });
        }
    }
    sites.sort_by_key(|site| (site.end - site.start, site.start));

    for site in &sites {
        for &idx in &site.rules {
            let (rule, call_rule) = call_rules[idx];
            let started = Instant::now();

            let mut qualifiers: Vec<(String, String)> = Vec::with_capacity(call_rule.imports.len());
            for (alias, path) in &call_rule.imports {
                let local = unit
                    .ensure_import(path, alias)
                    .map_err(context.conflict(rule))?;
                qualifiers.push((alias.clone(), local));
            }

            unit.wrap(site.start, site.end, |inner| {
                call_rule.template.render(inner, |alias| {
                    qualifiers
                        .iter()
                        .find(|(a, _)| a == alias)
                        .map_or_else(|| alias.to_string(), |(_, local)| local.clone())
                })
            })
            .map_err(context.conflict(rule))?;

            state.applied(&rule.name);
            summary.record(&rule.name, 1, started);
        }
    }
    if !sites.is_empty() {
        debug!(sites = sites.len(), file = %unit.path().display(), "Wrapped call sites");
    }
    Ok(())
}
