//! Struct augmentation: extra fields appended to the field list, extra
//! methods appended after the type declaration.

use tracing::debug;
use tree_sitter::Node;

use super::{WeaveContext, WeaveError};
use crate::rules::{Rule, StructRule};
use crate::source::{self, node_text, SourceUnit};

/// Returns `false` when the type is not declared in this file.
pub(crate) fn augment_struct(
    unit: &mut SourceUnit,
    rule: &Rule,
    struct_rule: &StructRule,
    context: &WeaveContext,
) -> Result<bool, WeaveError> {
    let (field_insert, method_insert) = {
        let text = unit.text();
        let Some(decl) = unit.find_type(&struct_rule.type_name) else {
            return Ok(false);
        };
        let ty = decl
            .spec
            .child_by_field_name("type")
            .filter(|t| t.kind() == "struct_type" && decl.spec.kind() == "type_spec")
            .ok_or_else(|| {
                context.unsupported(rule, format!("`{}` is not a struct type", struct_rule.type_name))
            })?;
        if decl.spec.child_by_field_name("type_parameters").is_some() {
            return Err(context.unsupported(
                rule,
                format!("generic struct `{}` cannot be augmented", struct_rule.type_name),
            ));
        }
        let list = source::children(ty)
            .into_iter()
            .find(|n| n.kind() == "field_declaration_list")
            .ok_or_else(|| context.unsupported(rule, "struct has no field list"))?;

        let declared: Vec<Node<'_>> = source::children(list)
            .into_iter()
            .filter(|n| n.kind() == "field_declaration")
            .collect();
        for field in &struct_rule.fields {
            let clash = declared.iter().any(|d| {
                let mut cursor = d.walk();
                let mut names = d.children_by_field_name("name", &mut cursor);
                names.any(|n| node_text(n, text) == field.name)
            });
            if clash {
                return Err(context.unsupported(
                    rule,
                    format!("field `{}` already exists on `{}`", field.name, struct_rule.type_name),
                ));
            }
        }

        let close = list.end_byte() - 1;
        let multiline = node_text(list, text).contains('\n');
        let lines: Vec<String> = struct_rule
            .fields
            .iter()
            .map(|f| format!("{} {}", f.name, f.ty))
            .collect();
        let field_insert = if lines.is_empty() {
            None
        } else if multiline {
            let lead = if text[..close].ends_with('\n') { "" } else { "\n" };
            let body: String = lines.iter().map(|l| format!("\t{l}\n")).collect();
            Some((close, format!("{lead}{body}")))
        } else if let Some(last) = declared.last() {
            Some((last.end_byte(), format!("; {}", lines.join("; "))))
        } else {
            let body: String = lines.iter().map(|l| format!("\t{l}\n")).collect();
            Some((close, format!("\n{body}")))
        };

        let method_insert = if struct_rule.methods.is_empty() {
            None
        } else {
            let text: String = struct_rule
                .methods
                .iter()
                .map(|m| format!("\n\n{}", m.trim_end()))
                .collect();
            Some((decl.decl.end_byte(), text))
        };
        (field_insert, method_insert)
    };

    if let Some((at, text)) = field_insert {
        unit.insert(at, text).map_err(context.conflict(rule))?;
    }
    if let Some((at, text)) = method_insert {
        unit.insert(at, text).map_err(context.conflict(rule))?;
    }
    debug!(rule = %rule.name, ty = %struct_rule.type_name, "Augmented struct");
    Ok(true)
}
