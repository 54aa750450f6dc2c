use serde_json::Value;
use std::collections::HashSet;

use crate::types::SHELL_TOOL;

/// Session-lifetime grants from earlier approvals.
///
/// Grant syntax:
/// - `Bash(npm install:*)` allows `npm install` and `npm install <args>`,
///   as long as the arguments don't chain or substitute another command
/// - `Bash(ls -la)` allows exactly `ls -la`
/// - anything else is a tool name
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    tools: HashSet<String>,
    commands: HashSet<String>,
    command_prefixes: Vec<String>,
}

impl AllowList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&mut self, entry: &str) {
        let entry = entry.trim();
        let Some(inner) = entry
            .strip_prefix(SHELL_TOOL)
            .and_then(|rest| rest.strip_prefix('('))
            .and_then(|rest| rest.strip_suffix(')'))
        else {
            self.tools.insert(entry.to_string());
            return;
        };

        match inner.strip_suffix(":*") {
            Some(prefix) => {
                if !self.command_prefixes.iter().any(|p| p == prefix) {
                    self.command_prefixes.push(prefix.to_string());
                }
            }
            None => {
                self.commands.insert(inner.to_string());
            }
        }
    }

    /// Whether a call of `tool` with `input` is already granted.
    pub fn allows(&self, tool: &str, input: &Value) -> bool {
        if self.tools.contains(tool) {
            return true;
        }
        if tool != SHELL_TOOL {
            return false;
        }
        let Some(command) = input.get("command").and_then(Value::as_str) else {
            return false;
        };
        self.commands.contains(command)
            || self
                .command_prefixes
                .iter()
                .any(|prefix| extends_prefix(command, prefix))
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty() && self.commands.is_empty() && self.command_prefixes.is_empty()
    }

    pub fn clear(&mut self) {
        self.tools.clear();
        self.commands.clear();
        self.command_prefixes.clear();
    }
}

/// Characters that let a shell run something other than the granted command.
const CHAIN_CHARS: &[char] = &[';', '&', '|', '\n', '\r', '`'];

/// `command` is `prefix` alone or `prefix` followed by whitespace and plain arguments.
fn extends_prefix(command: &str, prefix: &str) -> bool {
    let Some(args) = command.strip_prefix(prefix) else {
        return false;
    };
    if args.is_empty() {
        return true;
    }
    args.starts_with(char::is_whitespace) && !args.contains(CHAIN_CHARS) && !args.contains("$(")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn bash(command: &str) -> Value {
        json!({ "command": command })
    }

    #[test]
    fn tool_name_grant() {
        let mut list = AllowList::new();
        list.grant("Read");
        assert!(list.allows("Read", &json!({ "path": "/x" })));
        assert!(!list.allows("Write", &json!({})));
    }

    #[test]
    fn literal_command_grant_is_exact() {
        let mut list = AllowList::new();
        list.grant("Bash(ls -la)");
        assert!(list.allows("Bash", &bash("ls -la")));
        assert!(!list.allows("Bash", &bash("ls -la /etc")));
        assert!(!list.allows("Bash", &bash("ls")));
    }

    #[test]
    fn prefix_command_grant() {
        let mut list = AllowList::new();
        list.grant("Bash(npm install:*)");
        assert!(list.allows("Bash", &bash("npm install")));
        assert!(list.allows("Bash", &bash("npm install lodash")));
        assert!(!list.allows("Bash", &bash("npm run build")));
    }

    #[test]
    fn prefix_grant_stops_at_the_word() {
        let mut list = AllowList::new();
        list.grant("Bash(git:*)");
        assert!(list.allows("Bash", &bash("git")));
        assert!(list.allows("Bash", &bash("git status")));
        assert!(list.allows("Bash", &bash("git\tlog")));
        assert!(!list.allows("Bash", &bash("gitx status")));
        assert!(!list.allows("Bash", &bash("git-shell")));
    }

    #[test]
    fn prefix_grant_refuses_chained_commands() {
        let mut list = AllowList::new();
        list.grant("Bash(git:*)");
        for command in [
            "git status; rm -rf /",
            "git status && rm -rf /",
            "git status || rm -rf /",
            "git log | sh",
            "git status & rm -rf /",
            "git status\nrm -rf /",
            "git log `rm -rf /`",
            "git log $(rm -rf /)",
        ] {
            assert!(!list.allows("Bash", &bash(command)), "{command}");
        }
    }

    #[test]
    fn literal_grant_is_not_subject_to_chain_rules() {
        let mut list = AllowList::new();
        list.grant("Bash(make && make test)");
        assert!(list.allows("Bash", &bash("make && make test")));
        assert!(!list.allows("Bash", &bash("make && make test; rm -rf /")));
    }

    #[test]
    fn command_grants_do_not_cover_the_whole_tool() {
        let mut list = AllowList::new();
        list.grant("Bash(git status)");
        assert!(!list.allows("Bash", &json!({})));
        assert!(!list.allows("Bash", &bash("rm -rf /")));
    }

    #[test]
    fn clear_revokes_everything() {
        let mut list = AllowList::new();
        list.grant("Read");
        list.grant("Bash(cargo:*)");
        list.clear();
        assert!(list.is_empty());
        assert!(!list.allows("Bash", &bash("cargo test")));
    }

    proptest! {
        #[test]
        fn prefix_grant_covers_plain_arguments(
            prefix in "[a-z]{1,8}( [a-z]{1,8})?",
            args in "( [a-zA-Z0-9./=_-]{1,8}){0,3}",
        ) {
            let mut list = AllowList::new();
            list.grant(&format!("Bash({prefix}:*)"));
            let command = format!("{prefix}{args}");
            prop_assert!(list.allows("Bash", &bash(&command)));
        }

        #[test]
        fn prefix_grant_never_covers_a_longer_word(
            prefix in "[a-z]{1,8}",
            tail in "[a-z0-9_-]{1,8}",
        ) {
            let mut list = AllowList::new();
            list.grant(&format!("Bash({prefix}:*)"));
            let command = format!("{prefix}{tail} status");
            prop_assert!(!list.allows("Bash", &bash(&command)));
        }

        #[test]
        fn literal_grant_matches_only_itself(
            command in "[a-z]{1,8}( [a-z-]{1,8})?",
            other in "[a-z]{1,8}( [a-z-]{1,8})?",
        ) {
            let mut list = AllowList::new();
            list.grant(&format!("Bash({command})"));
            prop_assert!(list.allows("Bash", &bash(&command)));
            prop_assert_eq!(list.allows("Bash", &bash(&other)), other == command);
        }
    }
}
