use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Run-tracking handle supplied by the calling agent loop.
///
/// Tools receive it for observability only; it never changes what gets
/// executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub session_key: String,
    pub run_id: String,
    pub parent_run_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new(session_key: String) -> Self {
        Self {
            session_key,
            run_id: uuid::Uuid::new_v4().to_string(),
            parent_run_id: None,
            tags: Vec::new(),
            metadata: Map::new(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Context for a nested run in the same session.
    pub fn child(&self) -> Self {
        Self {
            session_key: self.session_key.clone(),
            run_id: uuid::Uuid::new_v4().to_string(),
            parent_run_id: Some(self.run_id.clone()),
            tags: self.tags.clone(),
            metadata: Map::new(),
        }
    }
}
