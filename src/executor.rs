use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::BridgeError;

/// Something that runs one named operation against the design document.
///
/// In production this is the remote host behind [`crate::client::HostClient`].
/// Tests substitute in-process fakes. `timeout` of `None` means the
/// implementation's default.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        command: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, BridgeError>;
}

/// Stand-in while no host is attached. Commands the bridge answers itself
/// still run; anything that reaches it fails with `NotConnected`.
pub struct NoHost;

#[async_trait]
impl Executor for NoHost {
    async fn execute(
        &self,
        _command: &str,
        _params: Value,
        _timeout: Option<Duration>,
    ) -> Result<Value, BridgeError> {
        Err(BridgeError::NotConnected)
    }
}
