//! Name-indexed tool registry.
//!
//! Registration happens during server construction; afterwards the
//! registry is read-only and safe for concurrent readers during agent
//! execution.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use teller_provider::ToolSchema;

use crate::{summary, Tool};

#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its declared name. A later registration with
    /// the same name replaces the earlier one.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        tracing::debug!(tool = %name, write = tool.requires_confirmation(), "registered tool");
        self.tools.write().insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().get(name).cloned()
    }

    /// All registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tools.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }

    /// Project the registry to the model API, optionally restricted to an
    /// allow-list. An empty allow-list projects no tools.
    pub fn schemas(&self, allow: Option<&[String]>) -> Vec<ToolSchema> {
        let tools = self.tools.read();
        let mut names: Vec<&String> = tools.keys().collect();
        names.sort();
        names
            .into_iter()
            .filter(|name| match allow {
                Some(list) => list.iter().any(|a| a == *name),
                None => true,
            })
            .map(|name| {
                let tool = &tools[name];
                ToolSchema {
                    name: tool.name().to_string(),
                    description: tool.description().to_string(),
                    input_schema: tool.input_schema(),
                }
            })
            .collect()
    }

    /// Render the human-readable summary for an invocation of `tool`.
    /// Falls back to the tool name when no template is declared.
    pub fn summarize(&self, tool: &dyn Tool, input: &serde_json::Value) -> String {
        match tool.summary_template() {
            Some(template) => summary::render(template, input),
            None => tool.name().to_string(),
        }
    }
}
