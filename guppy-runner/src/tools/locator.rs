//! Resolution of external tool paths.
//!
//! A tool is looked up in three places, highest priority first:
//!
//! 1. an explicit override (the CLI `--tool NAME=PATH` flag),
//! 2. the environment variable named by the tool definition,
//! 3. the default binary name searched on `PATH`.
//!
//! The first candidate that exists and is executable wins. Lookups read an
//! [`Environment`] snapshot taken once per process so that resolution is
//! deterministic and testable.

use crate::errors::{ConfigError, SourceCheck};
use crate::tools::ToolDefinition;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// An immutable snapshot of environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    /// Captures the current process environment.
    ///
    /// Variables whose name or value is not valid Unicode are skipped.
    #[must_use]
    pub fn from_process() -> Self {
        let vars = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();
        Self { vars }
    }

    /// Creates an empty environment.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Sets a variable.
    #[must_use]
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Gets a variable.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Returns the directories listed in `PATH`, in order.
    #[must_use]
    pub fn search_path(&self) -> Vec<PathBuf> {
        self.get("PATH")
            .map(|path| std::env::split_paths(path).filter(|p| !p.as_os_str().is_empty()).collect())
            .unwrap_or_default()
    }
}

/// Where a resolved tool path came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolSource {
    /// An explicit override.
    Override,
    /// An environment variable.
    EnvVar {
        /// The variable name.
        var: String,
    },
    /// A `PATH` search for the default binary name.
    SearchPath,
}

impl fmt::Display for ToolSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Override => write!(f, "override"),
            Self::EnvVar { var } => write!(f, "environment variable {var}"),
            Self::SearchPath => write!(f, "PATH"),
        }
    }
}

/// A resolved tool: logical name, absolute path and origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPath {
    /// The logical tool name.
    pub name: String,
    /// The absolute path of the executable.
    pub path: PathBuf,
    /// Which source produced the path.
    pub source: ToolSource,
}

/// The tools resolved for one run, keyed by logical name.
#[derive(Debug, Clone, Default)]
pub struct ResolvedTools {
    tools: BTreeMap<String, ToolPath>,
}

impl ResolvedTools {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a resolved tool.
    pub fn insert(&mut self, tool: ToolPath) {
        self.tools.insert(tool.name.clone(), tool);
    }

    /// Looks up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolPath> {
        self.tools.get(name)
    }

    /// Returns the number of resolved tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns true if no tools were resolved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Iterates over the resolved tools.
    pub fn iter(&self) -> impl Iterator<Item = &ToolPath> {
        self.tools.values()
    }
}

/// Resolves tool names to executable paths.
///
/// Results, including failures, are cached for the lifetime of the locator.
/// The cache is a concurrent map so a locator can be shared by concurrent
/// runs.
#[derive(Debug)]
pub struct ToolLocator {
    tools: Arc<BTreeMap<String, ToolDefinition>>,
    env: Arc<Environment>,
    overrides: BTreeMap<String, PathBuf>,
    cache: DashMap<String, Result<ToolPath, ConfigError>>,
}

impl ToolLocator {
    /// Creates a locator for the given tool definitions.
    #[must_use]
    pub fn new(tools: Arc<BTreeMap<String, ToolDefinition>>, env: Arc<Environment>) -> Self {
        Self {
            tools,
            env,
            overrides: BTreeMap::new(),
            cache: DashMap::new(),
        }
    }

    /// Sets explicit path overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownTool`] if an override names a tool that
    /// is not defined.
    pub fn with_overrides<I>(mut self, overrides: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, PathBuf)>,
    {
        for (name, path) in overrides {
            if !self.tools.contains_key(&name) {
                return Err(self.unknown(&name));
            }
            self.overrides.insert(name, path);
        }
        self.cache.clear();
        Ok(self)
    }

    /// Resolves a single tool.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownTool`] for undefined names and
    /// [`ConfigError::MissingTool`] when no source yields an executable.
    pub fn resolve(&self, name: &str) -> Result<ToolPath, ConfigError> {
        if let Some(cached) = self.cache.get(name) {
            return cached.clone();
        }

        let Some(definition) = self.tools.get(name) else {
            return Err(self.unknown(name));
        };

        let result = self.lookup(name, definition);
        match &result {
            Ok(tool) => debug!(tool = name, path = %tool.path.display(), source = %tool.source, "Resolved tool"),
            Err(e) => debug!(tool = name, error = %e, "Failed to resolve tool"),
        }
        self.cache.insert(name.to_string(), result.clone());
        result
    }

    /// Resolves every named tool, failing on the first that cannot be found.
    ///
    /// # Errors
    ///
    /// Returns the first resolution error.
    pub fn resolve_all<'a, I>(&self, names: I) -> Result<ResolvedTools, ConfigError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut resolved = ResolvedTools::new();
        for name in names {
            if resolved.get(name).is_none() {
                resolved.insert(self.resolve(name)?);
            }
        }
        Ok(resolved)
    }

    /// Returns the defined tool names.
    #[must_use]
    pub fn known_tools(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    fn lookup(&self, name: &str, definition: &ToolDefinition) -> Result<ToolPath, ConfigError> {
        let mut checked = Vec::new();

        match self.overrides.get(name) {
            Some(path) => match self.find_program(path) {
                Ok(path) => return Ok(self.found(name, path, ToolSource::Override)),
                Err(reason) => checked.push(SourceCheck::new(
                    format!("override {}", path.display()),
                    reason,
                )),
            },
            None => checked.push(SourceCheck::new("override", "not given")),
        }

        if let Some(var) = &definition.env_var {
            let label = format!("environment variable {var}");
            match self.env.get(var).map(str::trim) {
                None => checked.push(SourceCheck::new(label, "not set")),
                Some("") => checked.push(SourceCheck::new(label, "set but empty")),
                Some(value) => match self.find_program(Path::new(value)) {
                    Ok(path) => {
                        return Ok(self.found(name, path, ToolSource::EnvVar { var: var.clone() }))
                    }
                    Err(reason) => {
                        checked.push(SourceCheck::new(format!("{label}={value}"), reason));
                    }
                },
            }
        }

        match self.find_program(Path::new(&definition.binary)) {
            Ok(path) => Ok(self.found(name, path, ToolSource::SearchPath)),
            Err(reason) => {
                checked.push(SourceCheck::new(
                    format!("PATH search for '{}'", definition.binary),
                    reason,
                ));
                Err(ConfigError::missing_tool(name, checked))
            }
        }
    }

    /// Treats `program` as a path when it contains a separator, otherwise
    /// searches `PATH` for it.
    fn find_program(&self, program: &Path) -> Result<PathBuf, String> {
        if program.components().count() > 1 || program.is_absolute() {
            return check_executable(program);
        }

        let dirs = self.env.search_path();
        if dirs.is_empty() {
            return Err("PATH is not set".to_string());
        }
        dirs.iter()
            .find_map(|dir| check_executable(&dir.join(program)).ok())
            .ok_or_else(|| format!("not found in {} PATH entries", dirs.len()))
    }

    fn found(&self, name: &str, path: PathBuf, source: ToolSource) -> ToolPath {
        ToolPath {
            name: name.to_string(),
            path,
            source,
        }
    }

    fn unknown(&self, name: &str) -> ConfigError {
        ConfigError::UnknownTool {
            name: name.to_string(),
            known: self.known_tools(),
        }
    }
}

/// Returns the canonical path if `path` is an existing executable file.
fn check_executable(path: &Path) -> Result<PathBuf, String> {
    let metadata = std::fs::metadata(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => "does not exist".to_string(),
        _ => e.to_string(),
    })?;
    if !metadata.is_file() {
        return Err("is not a regular file".to_string());
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err("is not executable".to_string());
        }
    }

    path.canonicalize().map_err(|e| e.to_string())
}
