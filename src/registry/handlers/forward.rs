use async_trait::async_trait;
use serde_json::Value;

use crate::error::BridgeError;
use crate::registry::{CommandHandler, DispatchContext, Registry};

/// Sends the params unchanged as one remote command of the same name.
pub struct Forward {
    remote: &'static str,
    long_running: bool,
}

impl Forward {
    pub fn new(remote: &'static str, long_running: bool) -> Self {
        Self {
            remote,
            long_running,
        }
    }
}

#[async_trait]
impl CommandHandler for Forward {
    async fn handle(
        &self,
        _registry: &Registry,
        ctx: &DispatchContext,
        params: Value,
    ) -> Result<Value, BridgeError> {
        let timeout = if self.long_running {
            ctx.settings.long_request_timeout()
        } else {
            ctx.settings.request_timeout()
        };
        ctx.executor.execute(self.remote, params, Some(timeout)).await
    }
}
