//! Curated tool-provider templates offered for one-step installation.

use crate::config::ProviderDefinition;
use crate::constants::WORKSPACE_PLACEHOLDER;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderTemplate {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub command: &'static str,
    pub args: &'static [&'static str],
}

const TEMPLATES: &[ProviderTemplate] = &[
    ProviderTemplate {
        id: "filesystem",
        name: "Filesystem",
        description: "Read, write and search files inside the workspace.",
        command: "npx",
        args: &["-y", "@modelcontextprotocol/server-filesystem", WORKSPACE_PLACEHOLDER],
    },
    ProviderTemplate {
        id: "git",
        name: "Git",
        description: "Inspect history, diffs and branches of the workspace repository.",
        command: "uvx",
        args: &["mcp-server-git", "--repository", WORKSPACE_PLACEHOLDER],
    },
    ProviderTemplate {
        id: "fetch",
        name: "Fetch",
        description: "Download web pages and convert them to markdown.",
        command: "uvx",
        args: &["mcp-server-fetch"],
    },
    ProviderTemplate {
        id: "memory",
        name: "Memory",
        description: "Knowledge-graph memory that persists across tasks.",
        command: "npx",
        args: &["-y", "@modelcontextprotocol/server-memory"],
    },
    ProviderTemplate {
        id: "sequential-thinking",
        name: "Sequential Thinking",
        description: "Structured step-by-step reasoning scratchpad.",
        command: "npx",
        args: &["-y", "@modelcontextprotocol/server-sequential-thinking"],
    },
    ProviderTemplate {
        id: "time",
        name: "Time",
        description: "Current time and timezone conversion.",
        command: "uvx",
        args: &["mcp-server-time"],
    },
];

pub fn templates() -> &'static [ProviderTemplate] {
    TEMPLATES
}

pub fn find_template(id: &str) -> Option<&'static ProviderTemplate> {
    TEMPLATES.iter().find(|template| template.id == id)
}

impl ProviderTemplate {
    /// A new provider definition with the workspace placeholder replaced by
    /// `workspace`.
    pub fn instantiate(&self, workspace: &Path) -> ProviderDefinition {
        let workspace = workspace.to_string_lossy();
        let args = self
            .args
            .iter()
            .map(|arg| arg.replace(WORKSPACE_PLACEHOLDER, &workspace))
            .collect();
        ProviderDefinition::new(self.name, self.command, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn template_ids_are_unique() {
        let ids: HashSet<_> = templates().iter().map(|template| template.id).collect();
        assert_eq!(ids.len(), templates().len());
    }

    #[test]
    fn instantiate_substitutes_workspace() {
        let template = find_template("filesystem").expect("filesystem template");
        let definition = template.instantiate(Path::new("/work/project"));
        assert_eq!(definition.command, "npx");
        assert_eq!(definition.args.last().map(String::as_str), Some("/work/project"));
        assert!(definition.id.starts_with("provider-"));
        assert!(definition.enabled);
        assert!(!definition.auto_connect);
    }

    #[test]
    fn unknown_template_is_none() {
        assert!(find_template("nope").is_none());
    }
}
