//! Pass execution context definitions

/// Strictness of the transformation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Mode {
    /// Every pointer must be provably bounded; unresolved externals abort.
    Strict,
    /// Entry-function signatures are preserved, unresolved externals and
    /// unbounded pointers are downgraded to warnings.
    Permissive,
}

impl Default for Mode {
    fn default() -> Self {
        Self::Strict
    }
}

impl Mode {
    /// Return `true` if diagnostics should be downgraded to warnings.
    pub const fn is_permissive(&self) -> bool {
        matches!(self, Self::Permissive)
    }
}

/// Caller-supplied configuration of a single pass invocation.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Strict or permissive operation.
    pub mode: Mode,
    /// Functions whose signature must be preserved (host entry points).
    ///
    /// When empty and permissive, `main` is recognized by name as a
    /// fallback.
    pub entry_functions: Vec<String>,
}

impl Config {
    /// Strict configuration; all entry is via kernels.
    pub fn strict() -> Self {
        Self::default()
    }

    /// Permissive configuration with the default entry-function fallback.
    pub fn permissive() -> Self {
        Self {
            mode: Mode::Permissive,
            entry_functions: Vec::new(),
        }
    }

    /// Return `true` if `name` is a preserved entry function.
    pub fn is_entry(&self, name: &str) -> bool {
        if self.entry_functions.iter().any(|e| e == name) {
            return true;
        }

        self.mode.is_permissive() && self.entry_functions.is_empty() && name == "main"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_is_entry_only_in_permissive_fallback() {
        assert!(!Config::strict().is_entry("main"));
        assert!(Config::permissive().is_entry("main"));

        let explicit = Config {
            mode: Mode::Permissive,
            entry_functions: vec!["host_entry".into()],
        };
        assert!(explicit.is_entry("host_entry"));
        assert!(!explicit.is_entry("main"));
    }
}
