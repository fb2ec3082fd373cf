#[cfg(test)]
mod adapter_tests {
    use std::sync::Mutex;

    use serde_json::json;
    use validated_repl::*;

    /// Records every piece of code it is asked to run and echoes it back.
    #[derive(Debug, Default)]
    struct SpyEngine {
        calls: Mutex<Vec<String>>,
        fail_with: Option<String>,
    }

    impl SpyEngine {
        fn failing(message: &str) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_with: Some(message.to_string()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ExecutionEngine for SpyEngine {
        type Output = String;

        fn run(&self, code: &str) -> Result<String, ToolError> {
            self.calls.lock().unwrap().push(code.to_string());
            match &self.fail_with {
                Some(message) => Err(ToolError::Execution(message.clone())),
                None => Ok(code.to_string()),
            }
        }
    }

    fn rejecting_sanitizer() -> Sanitizer {
        Sanitizer::new(|query| {
            if query.contains("import os") {
                Err("os module is not allowed".into())
            } else {
                Ok(query.to_string())
            }
        })
    }

    fn shouting_sanitizer() -> Sanitizer {
        Sanitizer::infallible(|query| query.to_uppercase())
    }

    #[test]
    fn test_run_executes_original_query_with_default_sanitizer() {
        let tool = ValidatedReplTool::new(SpyEngine::default());
        let query = "  `python print(1+1)` ";

        let output = tool.run(query, None).unwrap();

        assert_eq!(output, query);
        assert_eq!(tool.engine().calls(), vec![query.to_string()]);
    }

    #[test]
    fn test_run_discards_transformed_output() {
        let tool = ValidatedReplTool::with_sanitizer(SpyEngine::default(), shouting_sanitizer());

        tool.run("print('hi')", None).unwrap();

        assert_eq!(tool.engine().calls(), vec!["print('hi')".to_string()]);
    }

    #[tokio::test]
    async fn test_arun_discards_transformed_output() {
        let tool = ValidatedReplTool::with_sanitizer(SpyEngine::default(), shouting_sanitizer());
        let ctx = ExecutionContext::new("test_session".into());

        let output = tool.arun("x = 1", Some(&ctx)).await.unwrap();

        assert_eq!(output, "x = 1");
        assert_eq!(tool.engine().calls(), vec!["x = 1".to_string()]);
    }

    #[test]
    fn test_execute_policy_runs_sanitized_query() {
        let tool = ValidatedReplTool::with_sanitizer(SpyEngine::default(), shouting_sanitizer())
            .with_policy(SanitizedInput::Execute);

        let output = tool.run("print('hi')", None).unwrap();

        assert_eq!(output, "PRINT('HI')");
        assert_eq!(tool.engine().calls(), vec!["PRINT('HI')".to_string()]);
    }

    #[tokio::test]
    async fn test_execute_policy_with_default_sanitizer() {
        let tool = ValidatedReplTool::new(SpyEngine::default()).with_policy(SanitizedInput::Execute);

        let output = tool.arun("```python\nprint(1+1)\n```", None).await.unwrap();

        assert_eq!(output, "print(1+1)");
    }

    #[test]
    fn test_run_rejected_before_execution() {
        let tool = ValidatedReplTool::with_sanitizer(SpyEngine::default(), rejecting_sanitizer());

        let result = tool.run("import os\nos.remove('x')", None);

        assert!(matches!(result, Err(ToolError::Sanitization(_))));
        assert!(tool.engine().calls().is_empty());
    }

    #[tokio::test]
    async fn test_arun_rejected_before_execution() {
        let tool = ValidatedReplTool::with_sanitizer(SpyEngine::default(), rejecting_sanitizer());
        let ctx = ExecutionContext::new("test_session".into());

        let result = tool.arun("import os", Some(&ctx)).await;

        match result {
            Err(err @ ToolError::Sanitization(_)) => {
                let source = std::error::Error::source(&err).unwrap();
                assert_eq!(source.to_string(), "os module is not allowed");
            }
            other => panic!("expected sanitization error, got {:?}", other),
        }
        assert!(tool.engine().calls().is_empty());
    }

    #[test]
    fn test_rejecting_sanitizer_lets_other_input_through() {
        let tool = ValidatedReplTool::with_sanitizer(SpyEngine::default(), rejecting_sanitizer());
        assert!(tool.run("print(42)", None).is_ok());
        assert_eq!(tool.engine().calls().len(), 1);
    }

    #[test]
    fn test_engine_error_propagates_from_run() {
        let tool = ValidatedReplTool::new(SpyEngine::failing("NameError: name 'y' is not defined"));

        let result = tool.run("print(y)", None);

        match result {
            Err(ToolError::Execution(message)) => assert!(message.contains("NameError")),
            other => panic!("expected execution error, got {:?}", other),
        }
    }

    #[test]
    fn test_engine_error_propagates_from_arun() {
        let tool = ValidatedReplTool::new(SpyEngine::failing("SyntaxError"));
        let result = tokio_test::block_on(tool.arun("def", None));
        assert!(matches!(result, Err(ToolError::Execution(_))));
        assert_eq!(tool.engine().calls(), vec!["def".to_string()]);
    }

    #[test]
    fn test_calls_are_independent() {
        let tool = ValidatedReplTool::with_sanitizer(SpyEngine::default(), rejecting_sanitizer());

        assert!(tool.run("import os", None).is_err());
        assert!(tool.run("a = 1", None).is_ok());
        assert!(tool.run("import os", None).is_err());
        assert_eq!(tool.engine().calls(), vec!["a = 1".to_string()]);
    }

    #[tokio::test]
    async fn test_tool_execute_wraps_output() {
        let tool = ValidatedReplTool::new(SpyEngine::default());
        let ctx = ExecutionContext::new("test_session".into());

        let result = tool.execute(ctx, json!({"query": "print(1)"})).await.unwrap();

        assert!(result.success);
        assert_eq!(result.output, Some(json!("print(1)")));
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_tool_execute_rejects_bad_input() {
        let tool = ValidatedReplTool::new(SpyEngine::default());
        let ctx = ExecutionContext::new("test_session".into());

        let result = tool.execute(ctx, json!({"code": "print(1)"})).await;

        assert!(matches!(result, Err(ToolError::Validation(_))));
        assert!(tool.engine().calls().is_empty());
    }

    #[tokio::test]
    async fn test_tool_execute_propagates_sanitizer_error() {
        let tool = ValidatedReplTool::with_sanitizer(SpyEngine::default(), rejecting_sanitizer());
        let ctx = ExecutionContext::new("test_session".into());

        let result = tool.execute(ctx, json!({"query": "import os"})).await;

        assert!(matches!(result, Err(ToolError::Sanitization(_))));
    }

    #[test]
    fn test_tool_metadata() {
        let tool = ValidatedReplTool::new(SpyEngine::default());

        assert_eq!(tool.name(), "python_repl");
        assert!(tool.description().contains("print(...)"));
        assert_eq!(tool.schema()["required"], json!(["query"]));

        let declaration = tool.declaration();
        assert_eq!(declaration["type"], "function");
        assert_eq!(declaration["function"]["name"], "python_repl");
    }

    #[test]
    fn test_default_policy_is_discard() {
        let tool = ValidatedReplTool::new(SpyEngine::default());
        assert_eq!(tool.policy(), SanitizedInput::Discard);
    }
}
