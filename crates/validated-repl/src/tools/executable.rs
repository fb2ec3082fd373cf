use async_trait::async_trait;

use crate::error::ToolError;
use crate::execution_context::ExecutionContext;

/// A tool that takes raw source text, with sync and async entry points.
#[async_trait]
pub trait ExecutableTool: Send + Sync {
    type Output: Send;

    fn run(
        &self,
        query: &str,
        run: Option<&ExecutionContext>,
    ) -> Result<Self::Output, ToolError>;

    async fn arun(
        &self,
        query: &str,
        run: Option<&ExecutionContext>,
    ) -> Result<Self::Output, ToolError>;
}
