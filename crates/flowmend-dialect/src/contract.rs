//! Command Output Contracts: the finite result-value sets of built-in Action
//! commands.
//!
//! The registry is constructor-scoped and passed explicitly — sessions that
//! need project-specific commands register them on their own copy.

use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct CommandContracts {
    outputs: HashMap<String, Vec<String>>,
}

impl CommandContracts {
    /// An empty registry (no command is contract-checked).
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in command contracts.
    pub fn builtin() -> Self {
        let mut c = Self::default();
        c.register("PlatformDetect", ["ios", "android", "desktop", "other", "error"]);
        c.register("BusinessHours", ["open", "closed", "error"]);
        c.register("UserLookup", ["found", "not_found", "error"]);
        c.register("LanguageDetect", ["supported", "unsupported", "error"]);
        c.register("HandoffAvailability", ["available", "unavailable", "error"]);
        c
    }

    /// Register (or replace) a contract.
    pub fn register<I, S>(&mut self, command: impl Into<String>, outputs: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs.insert(
            command.into(),
            outputs.into_iter().map(Into::into).collect(),
        );
    }

    /// The contract values for a command, if it has one.
    pub fn outputs(&self, command: &str) -> Option<&[String]> {
        self.outputs.get(command).map(Vec::as_slice)
    }

    pub fn is_known(&self, command: &str) -> bool {
        self.outputs.contains_key(command)
    }
}
