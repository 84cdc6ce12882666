//! Tool dispatch for model-initiated function calls.
//!
//! The model announces a call with a `toolUse` event and the session answers
//! it after the matching `contentEnd{type=TOOL}`. This module maps a tool name
//! and its raw JSON arguments to a JSON result through a registry of
//! [`ToolHandler`]s. Names are matched case-insensitively.
//!
//! # Example
//!
//! ```rust,ignore
//! use sonic_bridge::core::tools::ToolDispatcher;
//!
//! let dispatcher = ToolDispatcher::with_builtin_tools();
//! let result = dispatcher.dispatch("trackOrderTool", r#"{"orderId":"1234"}"#).await?;
//! println!("{}", result["orderStatus"]);
//! ```

mod date_time;
mod track_order;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub use date_time::{DATE_AND_TIME_TOOL_NAME, DateAndTimeTool, date_and_time_at};
pub use track_order::{
    ORDER_STATUSES, TRACK_ORDER_TOOL_NAME, TrackOrderTool, order_seed, track_order_on,
};

/// Errors raised while dispatching a tool call.
#[derive(Debug, Error)]
pub enum ToolError {
    /// No handler registered under that name
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Arguments were not a JSON document
    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    /// The handler itself failed
    #[error("Tool execution failed: {0}")]
    Execution(String),
}

/// Result type for tool calls.
pub type ToolCallResult<T> = Result<T, ToolError>;

/// Description of a tool advertised to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object
    pub input_schema: Value,
}

/// A callable tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn spec(&self) -> ToolSpec;

    async fn invoke(&self, arguments: Value) -> ToolCallResult<Value>;
}

/// Registry of tool handlers keyed by lowercase name.
#[derive(Clone, Default)]
pub struct ToolDispatcher {
    handlers: Vec<Arc<dyn ToolHandler>>,
    index: HashMap<String, usize>,
}

impl ToolDispatcher {
    /// A dispatcher with no tools.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A dispatcher with `getDateAndTimeTool` and `trackOrderTool`.
    pub fn with_builtin_tools() -> Self {
        let mut dispatcher = Self::empty();
        dispatcher.register(Arc::new(DateAndTimeTool));
        dispatcher.register(Arc::new(TrackOrderTool));
        dispatcher
    }

    /// Register a handler, replacing any handler with the same name.
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        let key = handler.spec().name.to_lowercase();
        match self.index.get(&key) {
            Some(&slot) => self.handlers[slot] = handler,
            None => {
                self.index.insert(key, self.handlers.len());
                self.handlers.push(handler);
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(&name.to_lowercase())
    }

    /// Tool specs in registration order.
    pub fn catalog(&self) -> Vec<ToolSpec> {
        self.handlers.iter().map(|h| h.spec()).collect()
    }

    /// Run the tool named `name` with the raw JSON `arguments` string.
    ///
    /// An empty argument string is treated as `{}`.
    pub async fn dispatch(&self, name: &str, arguments: &str) -> ToolCallResult<Value> {
        let handler = self
            .index
            .get(&name.to_lowercase())
            .and_then(|&slot| self.handlers.get(slot))
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        let arguments = if arguments.trim().is_empty() {
            Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_str(arguments)
                .map_err(|e| ToolError::InvalidArguments(e.to_string()))?
        };

        debug!("Dispatching tool {} with {}", name, arguments);
        handler.invoke(arguments).await
    }
}

impl std::fmt::Debug for ToolDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDispatcher")
            .field("tools", &self.index.keys().collect::<Vec<_>>())
            .finish()
    }
}
