/*!
# Weaver

Applies matched rules to source units. Everything here is in memory and
deterministic: the same units and rule set always produce the same output.

Per file, rules are applied in a fixed order of kinds and, within a kind,
in rule-set load order:

1. file replacements
2. function advice (`func` and `raw` rules sharing a pointcut are woven in one pass)
3. struct augmentation
4. call-site wrapping

A rule whose target is not declared in the package is a logged no-op. A
rule whose target exists but cannot be transformed is a [`WeaveError`].
*/

pub mod advice;
pub mod call;
pub mod context;
pub mod file;
pub mod structs;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Instant;

use indexmap::IndexMap;
use tracing::{debug, info};

use crate::rules::{GoVersion, MatchedRules, Rule, RuleSet};
use crate::source::{EditConflict, ParseError, ParseMode, SourceUnit};

#[derive(thiserror::Error, Debug)]
pub enum WeaveError {
    #[error("{file}: rule `{rule}` cannot weave {import_path}: {message}")]
    Unsupported {
        rule: String,
        file: PathBuf,
        import_path: String,
        message: String,
    },

    #[error("{file}: rule `{rule}` conflicts with an earlier edit in {import_path}: {source}")]
    Conflict {
        rule: String,
        file: PathBuf,
        import_path: String,
        #[source]
        source: EditConflict,
    },

    #[error("{file}: woven output for {import_path} is not valid Go: {source}")]
    InvalidOutput {
        file: PathBuf,
        import_path: String,
        #[source]
        source: ParseError,
    },

    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Where a weave is happening, for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct WeaveContext {
    pub import_path: String,
    pub version: Option<GoVersion>,
    pub file: PathBuf,
}

impl WeaveContext {
    pub fn new(import_path: impl Into<String>) -> Self {
        Self {
            import_path: import_path.into(),
            ..Self::default()
        }
    }

    pub fn with_version(mut self, version: Option<GoVersion>) -> Self {
        self.version = version;
        self
    }

    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = file.into();
        self
    }

    pub(crate) fn unsupported(&self, rule: &Rule, message: impl Into<String>) -> WeaveError {
        WeaveError::Unsupported {
            rule: rule.name.clone(),
            file: self.file.clone(),
            import_path: self.import_path.clone(),
            message: message.into(),
        }
    }

    pub(crate) fn conflict(&self, rule: &Rule) -> impl FnOnce(EditConflict) -> WeaveError + '_ {
        let rule = rule.name.clone();
        move |source| WeaveError::Conflict {
            rule,
            file: self.file.clone(),
            import_path: self.import_path.clone(),
            source,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuleStats {
    pub rule_name: String,
    /// Files the rule was considered against.
    pub applications: u64,
    /// Declarations or call-sites it rewrote.
    pub transformations: u64,
    pub errors: u64,
    pub total_time_ms: u64,
}

impl RuleStats {
    pub fn new(rule_name: impl Into<String>) -> Self {
        Self {
            rule_name: rule_name.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WeaveSummary {
    pub files_processed: u64,
    pub files_modified: u64,
    pub rules: IndexMap<String, RuleStats>,
}

impl WeaveSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn stats_mut(&mut self, rule: &str) -> &mut RuleStats {
        self.rules
            .entry(rule.to_string())
            .or_insert_with(|| RuleStats::new(rule))
    }

    pub(crate) fn record(&mut self, rule: &str, transformations: u64, started: Instant) {
        let stats = self.stats_mut(rule);
        stats.transformations += transformations;
        stats.total_time_ms += started.elapsed().as_millis() as u64;
    }

    /// Rules that matched the package but found nothing to rewrite.
    pub fn idle_rules(&self) -> impl Iterator<Item = &str> {
        self.rules
            .values()
            .filter(|s| s.transformations == 0)
            .map(|s| s.rule_name.as_str())
    }
}

/// Per-file bookkeeping shared by the individual passes.
#[derive(Debug, Default)]
pub(crate) struct FileState {
    pub replaced: bool,
    pub uses_linkname: bool,
    pub applied: Vec<String>,
}

impl FileState {
    pub fn applied(&mut self, rule: &str) {
        if !self.applied.iter().any(|r| r == rule) {
            self.applied.push(rule.to_string());
        }
    }
}

/// Declarations a package receives once, whichever file carries them.
#[derive(Debug, Clone, Default)]
pub struct PackageState {
    /// `__weftHookContext` has been emitted into one of the package's files.
    pub hook_context_declared: bool,
}

/// Result of weaving one file.
#[derive(Debug, Clone)]
pub struct WovenFile {
    pub path: PathBuf,
    pub text: String,
    pub modified: bool,
    /// Rules that changed this file, in application order.
    pub applied: Vec<String>,
    /// Bodyless `//go:linkname` hook declarations were added.
    pub uses_linkname: bool,
    /// Import paths the weave added to the file.
    pub added_imports: Vec<String>,
}

/// Result of weaving every file of one package.
#[derive(Debug, Clone)]
pub struct PackageWeave {
    pub import_path: String,
    pub files: Vec<WovenFile>,
    pub summary: WeaveSummary,
}

impl PackageWeave {
    pub fn is_modified(&self) -> bool {
        self.files.iter().any(|f| f.modified)
    }

    pub fn modified_files(&self) -> impl Iterator<Item = &WovenFile> {
        self.files.iter().filter(|f| f.modified)
    }

    pub fn uses_linkname(&self) -> bool {
        self.files.iter().any(|f| f.uses_linkname)
    }

    pub fn added_imports(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for path in self.files.iter().flat_map(|f| f.added_imports.iter()) {
            if !out.contains(path) {
                out.push(path.clone());
            }
        }
        out
    }
}

pub struct Weaver<'r> {
    rules: &'r RuleSet,
}

impl<'r> Weaver<'r> {
    pub fn new(rules: &'r RuleSet) -> Self {
        Self { rules }
    }

    /// Weave every file of the package `import_path`.
    pub fn weave_package(
        &self,
        units: Vec<SourceUnit>,
        import_path: &str,
        version: Option<&GoVersion>,
    ) -> Result<PackageWeave, WeaveError> {
        let matched = self.rules.matching(import_path, version);
        let context = WeaveContext::new(import_path).with_version(version.cloned());
        let mut summary = WeaveSummary::new();
        for rule in matched.iter() {
            summary.stats_mut(&rule.name);
        }

        let mut package = PackageState::default();
        let mut files = Vec::with_capacity(units.len());
        for unit in units {
            let context = context.clone().with_file(unit.path());
            files.push(self.weave_file(unit, &matched, &context, &mut package, &mut summary)?);
        }

        for rule in summary.idle_rules() {
            info!(rule, import_path, "Rule target not found in package, skipping");
        }
        Ok(PackageWeave {
            import_path: import_path.to_string(),
            files,
            summary,
        })
    }

    /// Weave one file against rules already matched to its package.
    /// `package` carries the declarations earlier files of the same package
    /// already received.
    pub fn weave_file(
        &self,
        unit: SourceUnit,
        matched: &MatchedRules<'_>,
        context: &WeaveContext,
        package: &mut PackageState,
        summary: &mut WeaveSummary,
    ) -> Result<WovenFile, WeaveError> {
        summary.files_processed += 1;
        for rule in matched.iter() {
            summary.stats_mut(&rule.name).applications += 1;
        }

        let original_imports: BTreeSet<String> =
            unit.imports().specs().iter().map(|s| s.path.clone()).collect();
        let mut state = FileState::default();
        let result = self.apply_rules(unit, matched, context, &mut state, package, summary);
        let unit = match result {
            Ok(unit) => unit,
            Err(err) => {
                if let WeaveError::Unsupported { rule, .. } | WeaveError::Conflict { rule, .. } = &err {
                    summary.stats_mut(rule).errors += 1;
                }
                return Err(err);
            }
        };

        let path = unit.path().to_path_buf();
        if !state.replaced && !unit.is_modified() {
            return Ok(WovenFile {
                path,
                text: unit.text().to_string(),
                modified: false,
                applied: Vec::new(),
                uses_linkname: false,
                added_imports: Vec::new(),
            });
        }

        let woven = unit
            .reparse(ParseMode::Full)
            .map_err(|source| WeaveError::InvalidOutput {
                file: path.clone(),
                import_path: context.import_path.clone(),
                source,
            })?;
        let mut added_imports: Vec<String> = Vec::new();
        for spec in woven.imports().specs() {
            if !original_imports.contains(&spec.path) && !added_imports.contains(&spec.path) {
                added_imports.push(spec.path.clone());
            }
        }

        summary.files_modified += 1;
        debug!(file = %path.display(), rules = ?state.applied, "Wove file");
        Ok(WovenFile {
            path,
            text: woven.text().to_string(),
            modified: true,
            applied: state.applied,
            uses_linkname: state.uses_linkname,
            added_imports,
        })
    }

    fn apply_rules(
        &self,
        unit: SourceUnit,
        matched: &MatchedRules<'_>,
        context: &WeaveContext,
        state: &mut FileState,
        package: &mut PackageState,
        summary: &mut WeaveSummary,
    ) -> Result<SourceUnit, WeaveError> {
        let mut unit = unit;
        for (rule, file_rule) in matched.file_rules() {
            let started = Instant::now();
            if let Some(replaced) = file::replace_file(&unit, rule, file_rule, context)? {
                unit = replaced;
                state.replaced = true;
                state.applied(&rule.name);
                summary.record(&rule.name, 1, started);
            }
        }

        advice::weave_functions(&mut unit, matched, context, state, package, summary)?;

        for (rule, struct_rule) in matched.struct_rules() {
            let started = Instant::now();
            if structs::augment_struct(&mut unit, rule, struct_rule, context)? {
                state.applied(&rule.name);
                summary.record(&rule.name, 1, started);
            }
        }

        call::wrap_calls(&mut unit, matched, context, state, summary)?;
        Ok(unit)
    }
}

/// Identifier fragment for a rule name.
pub(crate) fn rule_ident(rule: &Rule) -> String {
    rule.name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}
