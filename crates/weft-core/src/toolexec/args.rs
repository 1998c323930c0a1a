//! The argument vector the go command hands to a `-toolexec` program:
//! the real tool's path followed by the tool's own arguments.

use std::path::{Path, PathBuf};

use super::ToolexecError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub tool: PathBuf,
    pub args: Vec<String>,
}

impl ToolInvocation {
    pub fn parse<I, S>(argv: I) -> Result<Self, ToolexecError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv = argv.into_iter().map(Into::into);
        let tool = argv.next().ok_or(ToolexecError::MissingTool)?;
        Ok(Self {
            tool: PathBuf::from(tool),
            args: argv.collect(),
        })
    }

    /// Tool base name without extension: `compile`, `link`, `asm`, ...
    pub fn tool_name(&self) -> &str {
        self.tool
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
    }

    pub fn is_compile(&self) -> bool {
        self.tool_name() == "compile"
    }

    /// `-V=full` probes feed the go command's build cache key.
    pub fn is_version_query(&self) -> bool {
        self.args.iter().any(|a| a == "-V=full" || a == "-V")
    }

    fn flag_index(&self, flag: &str) -> Option<(usize, bool)> {
        let inline = format!("{flag}=");
        self.args.iter().enumerate().find_map(|(idx, arg)| {
            if arg == flag {
                Some((idx, false))
            } else if arg.starts_with(&inline) {
                Some((idx, true))
            } else {
                None
            }
        })
    }

    /// Value of `-flag value` or `-flag=value`.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        match self.flag_index(flag)? {
            (idx, false) => self.args.get(idx + 1).map(String::as_str),
            (idx, true) => Some(&self.args[idx][flag.len() + 1..]),
        }
    }

    pub fn set_flag_value(&mut self, flag: &str, value: &str) -> bool {
        match self.flag_index(flag) {
            Some((idx, false)) if idx + 1 < self.args.len() => {
                self.args[idx + 1] = value.to_string();
                true
            }
            Some((idx, true)) => {
                self.args[idx] = format!("{flag}={value}");
                true
            }
            _ => false,
        }
    }

    /// Drop a boolean flag; returns whether it was present.
    pub fn remove_flag(&mut self, flag: &str) -> bool {
        let before = self.args.len();
        let inline = format!("{flag}=");
        self.args.retain(|a| a != flag && !a.starts_with(&inline));
        self.args.len() != before
    }

    /// Positional Go source arguments with their indices.
    pub fn go_files(&self) -> Vec<(usize, PathBuf)> {
        self.args
            .iter()
            .enumerate()
            .filter(|(_, a)| !a.starts_with('-') && a.ends_with(".go"))
            .map(|(idx, a)| (idx, PathBuf::from(a)))
            .collect()
    }

    pub fn replace_arg(&mut self, idx: usize, value: &Path) {
        if let Some(arg) = self.args.get_mut(idx) {
            *arg = value.display().to_string();
        }
    }
}
