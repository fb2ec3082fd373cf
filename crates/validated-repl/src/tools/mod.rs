pub mod base;
pub mod executable;
pub mod validated_repl;

pub use base::{Tool, ToolResult};
pub use executable::ExecutableTool;
pub use validated_repl::ValidatedReplTool;
