use std::borrow::Cow;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::{ReplConfig, SanitizedInput};
use crate::engine::{ExecutionEngine, PythonRepl};
use crate::error::ToolError;
use crate::execution_context::ExecutionContext;
use crate::sanitize::Sanitizer;
use crate::tools::base::{Tool, ToolResult};
use crate::tools::executable::ExecutableTool;

const TOOL_NAME: &str = "python_repl";

#[derive(Deserialize)]
struct ReplInput {
    query: String,
}

/// Python REPL tool that passes every query through a sanitizer first.
///
/// By default the sanitizer acts as a gate only: if it fails the call is
/// aborted before anything runs, but its output is dropped and the query is
/// executed as received. Use [`SanitizedInput::Execute`] to run the
/// sanitized text instead.
#[derive(Debug)]
pub struct ValidatedReplTool<E = PythonRepl> {
    engine: E,
    sanitizer: Sanitizer,
    policy: SanitizedInput,
}

impl ValidatedReplTool<PythonRepl> {
    pub fn from_config(config: &ReplConfig) -> Self {
        Self::new(PythonRepl::from_config(config)).with_policy(config.sanitized_input)
    }
}

impl Default for ValidatedReplTool<PythonRepl> {
    fn default() -> Self {
        Self::new(PythonRepl::default())
    }
}

impl<E: ExecutionEngine> ValidatedReplTool<E> {
    pub fn new(engine: E) -> Self {
        Self::with_sanitizer(engine, Sanitizer::default())
    }

    pub fn with_sanitizer(engine: E, sanitizer: Sanitizer) -> Self {
        Self {
            engine,
            sanitizer,
            policy: SanitizedInput::default(),
        }
    }

    pub fn with_policy(mut self, policy: SanitizedInput) -> Self {
        self.policy = policy;
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn policy(&self) -> SanitizedInput {
        self.policy
    }

    /// Picks the text to execute, or fails if the sanitizer rejects it.
    fn prepare<'q>(&self, query: &'q str) -> Result<Cow<'q, str>, ToolError> {
        let sanitized = self.sanitizer.apply(query).map_err(|e| {
            warn!("Sanitizer rejected input: {}", e);
            ToolError::Sanitization(e)
        })?;

        match self.policy {
            SanitizedInput::Execute => Ok(Cow::Owned(sanitized)),
            SanitizedInput::Discard => {
                if sanitized != query {
                    debug!("Sanitized input differs from query; executing query as received");
                }
                Ok(Cow::Borrowed(query))
            }
        }
    }

    fn invoke(&self, query: &str, run: Option<&ExecutionContext>) -> Result<E::Output, ToolError> {
        match run {
            Some(ctx) => info!(
                "Executing {} for session: {} (run {})",
                TOOL_NAME, ctx.session_key, ctx.run_id
            ),
            None => info!("Executing {}", TOOL_NAME),
        }

        let code = self.prepare(query)?;
        self.engine.run(&code)
    }
}

#[async_trait]
impl<E: ExecutionEngine> ExecutableTool for ValidatedReplTool<E> {
    type Output = E::Output;

    fn run(&self, query: &str, run: Option<&ExecutionContext>) -> Result<E::Output, ToolError> {
        self.invoke(query, run)
    }

    async fn arun(
        &self,
        query: &str,
        run: Option<&ExecutionContext>,
    ) -> Result<E::Output, ToolError> {
        self.invoke(query, run)
    }
}

#[async_trait]
impl<E> Tool for ValidatedReplTool<E>
where
    E: ExecutionEngine,
    E::Output: Serialize,
{
    fn name(&self) -> &'static str {
        TOOL_NAME
    }

    fn description(&self) -> &'static str {
        "A Python shell. Use this to execute python commands. Input should be a valid python \
         command. If you want to see the output of a value, you should print it out with \
         `print(...)`."
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"}
            },
            "required": ["query"]
        })
    }

    async fn execute(
        &self,
        ctx: ExecutionContext,
        input: serde_json::Value,
    ) -> Result<ToolResult, ToolError> {
        let input: ReplInput = serde_json::from_value(input)
            .map_err(|e| ToolError::Validation(e.to_string()))?;

        let output = self.arun(&input.query, Some(&ctx)).await?;
        let output = serde_json::to_value(output)
            .map_err(|e| ToolError::Execution(format!("Unserializable output: {}", e)))?;

        Ok(ToolResult {
            success: true,
            output: Some(output),
            error: None,
        })
    }
}
