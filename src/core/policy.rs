//! Import and builtin policy configuration

use serde::{Deserialize, Serialize};

/// Modules a submission may import when no other allowlist is configured
pub const DEFAULT_ALLOWED_IMPORTS: &[&str] = &[
    "math",
    "json",
    "re",
    "collections",
    "itertools",
    "functools",
    "operator",
    "string",
    "textwrap",
    "datetime",
    "decimal",
    "fractions",
    "random",
    "hashlib",
    "hmac",
    "copy",
    "enum",
    "dataclasses",
    "typing",
    "types",
    "abc",
    "io",
    "statistics",
];

/// Modules that are always rejected
pub const DEFAULT_DENIED_IMPORTS: &[&str] = &[
    "os",
    "sys",
    "subprocess",
    "shutil",
    "pathlib",
    "socket",
    "http",
    "urllib",
    "requests",
    "ftplib",
    "smtplib",
    "ctypes",
    "importlib",
    "code",
    "compile",
    "signal",
    "multiprocessing",
    "threading",
    "pickle",
];

/// Builtins a submission must not call
pub const DEFAULT_DENIED_BUILTINS: &[&str] = &[
    "exec",
    "eval",
    "compile",
    "__import__",
    "globals",
    "locals",
    "vars",
    "dir",
    "getattr",
    "setattr",
    "delattr",
    "open",
    "input",
    "breakpoint",
];

/// Serialization modules added to the deny list by `Sandbox::run_safe`
pub const SAFE_PROFILE_EXTRA_DENIED: &[&str] = &["pickle", "shelve", "marshal"];

/// Import and access policy configuration.
///
/// `denied_imports` always takes precedence over `allowed_imports`; an empty
/// allowlist means only the denylist applies.
///
/// `allow_file_read` / `allow_file_write` are reserved and not enforced:
/// file access is only limited through `open` being a denied builtin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub allowed_imports: Vec<String>,
    pub denied_imports: Vec<String>,
    pub denied_builtins: Vec<String>,
    pub allow_file_read: bool,
    pub allow_file_write: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allowed_imports: to_strings(DEFAULT_ALLOWED_IMPORTS),
            denied_imports: to_strings(DEFAULT_DENIED_IMPORTS),
            denied_builtins: to_strings(DEFAULT_DENIED_BUILTINS),
            allow_file_read: false,
            allow_file_write: false,
        }
    }
}

impl PolicyConfig {
    /// Whether a module root may be imported under this policy
    pub fn import_allowed(&self, module: &str) -> bool {
        let root = module_root(module);
        if self.denied_imports.iter().any(|m| m == root) {
            return false;
        }
        self.allowed_imports.is_empty() || self.allowed_imports.iter().any(|m| m == root)
    }

    pub fn is_denied_module(&self, name: &str) -> bool {
        self.denied_imports.iter().any(|m| m == name)
    }

    pub fn is_denied_builtin(&self, name: &str) -> bool {
        self.denied_builtins.iter().any(|b| b == name)
    }

    /// Copy of this policy with extra modules appended to the deny list
    pub fn with_extra_denied<I, S>(&self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut policy = self.clone();
        for module in extra {
            let module = module.into();
            if !policy.denied_imports.contains(&module) {
                policy.denied_imports.push(module);
            }
        }
        policy
    }
}

/// First segment of a dotted module path
pub fn module_root(module: &str) -> &str {
    module.split('.').next().unwrap_or(module)
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
