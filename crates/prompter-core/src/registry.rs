use std::collections::HashMap;
use std::sync::Arc;

use crate::tool::Tool;

/// Lookup table of registered tools, keyed by slug.
///
/// Built once at startup and shared behind an `Arc`; resolution failure is
/// reported to the client as a START_TOOL_FAILURE ack by the router.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `tool` under its slug, replacing any previous registration.
    pub fn register(&mut self, tool: Tool) -> Arc<Tool> {
        let tool = Arc::new(tool);
        self.tools.insert(tool.slug().to_string(), Arc::clone(&tool));
        tool
    }

    pub fn resolve(&self, slug: &str) -> Option<Arc<Tool>> {
        self.tools.get(slug).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
