use async_trait::async_trait;
use serde_json::Value;

use crate::error::{BridgeError, ValidationError};
use crate::registry::catalog::help_text;
use crate::registry::params::HelpParams;
use crate::registry::{CommandHandler, DispatchContext, Registry};

/// Answers `help` from the registry. Never touches the host.
pub struct Help;

#[async_trait]
impl CommandHandler for Help {
    async fn handle(
        &self,
        registry: &Registry,
        _ctx: &DispatchContext,
        params: Value,
    ) -> Result<Value, BridgeError> {
        let p: HelpParams =
            serde_json::from_value(params).map_err(|e| ValidationError::new("", e.to_string()))?;
        Ok(Value::String(help_text(registry, p.topic.as_deref())))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use crate::executor::fake::FakeExecutor;
    use crate::progress::NoopProgress;
    use crate::registry::{testing, DuplicatePolicy, Registry};

    #[tokio::test]
    async fn help_is_answered_locally() {
        let registry = Registry::with_builtin(DuplicatePolicy::Reject).unwrap();
        let exec = FakeExecutor::new();
        let ctx = testing::context(exec.clone(), Arc::new(NoopProgress));

        let out = registry
            .dispatch("help", json!({ "topic": "text" }), &ctx)
            .await
            .unwrap();
        assert!(out.as_str().unwrap().contains("set_multiple_text_contents"));

        let out = registry.dispatch("help", json!(null), &ctx).await.unwrap();
        assert!(out.as_str().unwrap().starts_with("Available command categories"));
        assert_eq!(exec.call_count(), 0);
    }
}
