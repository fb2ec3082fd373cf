pub mod config;
pub mod engine;
pub mod error;
pub mod execution_context;
pub mod sandbox;
pub mod sanitize;
pub mod tools;

pub use config::{ReplConfig, ReplMode, SanitizedInput};
pub use engine::{ExecutionEngine, PythonRepl, ReplOutput};
pub use error::{SanitizeError, ToolError};
pub use execution_context::ExecutionContext;
pub use sanitize::{default_sanitize_input, Sanitizer};
pub use tools::{ExecutableTool, Tool, ToolResult, ValidatedReplTool};
