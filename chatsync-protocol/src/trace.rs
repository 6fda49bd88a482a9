//! Thinking Trace
//!
//! Ordered record of the assistant's intermediate activity during one response.
//!
//! The trace holds at most one "thinking" item, which is always last. Tool items
//! are inserted in front of it, so a trace reads as the finished tool calls
//! followed by whatever the assistant is currently reasoning about.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Label used for the single thinking item
pub const THINKING_LABEL: &str = "Thinking";

/// Kind of trace item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceItemKind {
    Thinking,
    Tool,
}

/// One entry of the thinking trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThinkingTraceItem {
    pub kind: TraceItemKind,
    /// Tool name, or [`THINKING_LABEL`]
    pub label: String,
    pub detail: Option<String>,
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ThinkingTraceItem {
    fn thinking(text: String) -> Self {
        Self {
            kind: TraceItemKind::Thinking,
            label: THINKING_LABEL.to_string(),
            detail: Some(text),
            completed: false,
            metadata: None,
        }
    }

    fn tool(tool: String, detail: Option<String>, metadata: Option<Value>) -> Self {
        Self {
            kind: TraceItemKind::Tool,
            label: tool,
            detail,
            completed: false,
            metadata,
        }
    }

    fn is_open_tool(&self, tool: &str) -> bool {
        self.kind == TraceItemKind::Tool && !self.completed && self.label == tool
    }
}

/// Thinking/tool trace of a single response
#[derive(Debug, Clone, Default)]
pub struct ThinkingTrace {
    items: Vec<ThinkingTraceItem>,
    completed_tools: HashSet<String>,
}

impl ThinkingTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert the single thinking item and move it to the end
    pub fn thinking(&mut self, text: impl Into<String>) {
        let text = text.into();
        match self.thinking_position() {
            Some(pos) => {
                let mut item = self.items.remove(pos);
                item.detail = Some(text);
                item.completed = false;
                self.items.push(item);
            }
            None => self.items.push(ThinkingTraceItem::thinking(text)),
        }
    }

    /// Complete the thinking item and insert a running tool in front of it
    pub fn tool_start(&mut self, tool: impl Into<String>, detail: Option<String>, metadata: Option<Value>) {
        let item = ThinkingTraceItem::tool(tool.into(), detail, metadata);
        match self.thinking_position() {
            Some(pos) => {
                self.items[pos].completed = true;
                self.items.insert(pos, item);
            }
            None => self.items.push(item),
        }
    }

    /// Update the most recent running item for `tool`
    ///
    /// Returns false when no such item exists.
    pub fn tool_detail(&mut self, tool: &str, detail: impl Into<String>) -> bool {
        match self.items.iter_mut().rev().find(|item| item.is_open_tool(tool)) {
            Some(item) => {
                item.detail = Some(detail.into());
                true
            }
            None => false,
        }
    }

    /// Complete the most recent running item for `tool`
    ///
    /// The tool is recorded as completed even if no running item matched,
    /// and repeated calls are harmless.
    pub fn tool_end(&mut self, tool: &str) {
        if let Some(item) = self.items.iter_mut().rev().find(|item| item.is_open_tool(tool)) {
            item.completed = true;
        }
        self.completed_tools.insert(tool.to_string());
    }

    /// Mark every item completed
    pub fn stop(&mut self) {
        for item in &mut self.items {
            item.completed = true;
        }
    }

    pub fn items(&self) -> &[ThinkingTraceItem] {
        &self.items
    }

    pub fn snapshot(&self) -> Vec<ThinkingTraceItem> {
        self.items.clone()
    }

    pub fn is_tool_completed(&self, tool: &str) -> bool {
        self.completed_tools.contains(tool)
    }

    /// Whether any tool is still running
    pub fn has_running_tool(&self) -> bool {
        self.items
            .iter()
            .any(|item| item.kind == TraceItemKind::Tool && !item.completed)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn thinking_position(&self) -> Option<usize> {
        self.items
            .iter()
            .position(|item| item.kind == TraceItemKind::Thinking)
    }
}
