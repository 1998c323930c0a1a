//! Whole-file replacement.

use tracing::debug;

use super::{WeaveContext, WeaveError};
use crate::rules::{FileRule, Rule};
use crate::source::{self, node_text, ParseMode, SourceUnit};

/// Replace `unit` with the rule's source when the base name matches. The
/// replacement's package clause is rewritten to the unit's package.
pub(crate) fn replace_file(
    unit: &SourceUnit,
    rule: &Rule,
    file_rule: &FileRule,
    context: &WeaveContext,
) -> Result<Option<SourceUnit>, WeaveError> {
    let base = unit
        .path()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if !file_rule.matches(&base) {
        return Ok(None);
    }

    let probe = SourceUnit::parse(unit.path(), file_rule.replace.as_str(), ParseMode::SkipObjectResolution)
        .map_err(|e| context.unsupported(rule, format!("replacement does not parse: {e}")))?;
    let ident = probe
        .root()
        .and_then(|root| {
            source::children(root)
                .into_iter()
                .find(|n| n.kind() == "package_clause")
        })
        .and_then(|clause| {
            source::children(clause)
                .into_iter()
                .find(|n| n.kind() == "package_identifier")
        })
        .ok_or_else(|| context.unsupported(rule, "replacement has no package clause"))?;

    let replaced = if node_text(ident, probe.text()) == unit.package_name() {
        probe.text().to_string()
    } else {
        let mut text = probe.text().to_string();
        text.replace_range(ident.byte_range(), unit.package_name());
        text
    };

    debug!(rule = %rule.name, file = %base, "Replacing file");
    Ok(Some(SourceUnit::parse(unit.path(), replaced, unit.mode())?))
}
