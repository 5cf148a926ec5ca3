//! Executor side of the wire protocol.
//!
//! `HostRuntime` answers `execute-command` frames from a table of named
//! handlers, one task per request, so replies go back in completion order.
//! Long-running handlers stream `command_progress` frames through their
//! [`HostCall`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::progress::{ProgressSink, ProgressTracker};
use crate::protocol::{error_frame, result_frame, Outbound, ProgressEvent};
use crate::transport::{Connection, FrameSender};

/// Sends progress reports back over the connection.
pub struct WireProgress {
    sender: FrameSender,
}

impl ProgressSink for WireProgress {
    fn emit(&self, event: &ProgressEvent) {
        if self.sender.send(event.to_frame()).is_err() {
            debug!(id = %event.command_id, "progress dropped, caller gone");
        }
    }
}

/// One in-flight request as seen by its handler.
pub struct HostCall {
    pub id: String,
    pub command: String,
    sender: FrameSender,
}

impl HostCall {
    /// A progress tracker whose events carry this request's id.
    pub fn tracker(&self) -> ProgressTracker {
        let sink: Arc<dyn ProgressSink> = Arc::new(WireProgress {
            sender: self.sender.clone(),
        });
        ProgressTracker::new(&self.id, &self.command, sink)
    }

    /// Emit a host event (anything that is not a reply or progress).
    pub fn emit_event(&self, event_type: &str, mut payload: Map<String, Value>) {
        payload.insert("type".into(), Value::String(event_type.to_string()));
        if self.sender.send(Value::Object(payload)).is_err() {
            debug!(event_type, "host event dropped, caller gone");
        }
    }
}

#[async_trait]
pub trait HostHandler: Send + Sync {
    async fn call(&self, call: &HostCall, params: Value) -> Result<Value, String>;
}

/// Adapter for handlers that finish without awaiting anything.
pub struct SyncHandler<F>(pub F);

#[async_trait]
impl<F> HostHandler for SyncHandler<F>
where
    F: Fn(&HostCall, Value) -> Result<Value, String> + Send + Sync,
{
    async fn call(&self, call: &HostCall, params: Value) -> Result<Value, String> {
        (self.0)(call, params)
    }
}

#[derive(Default)]
pub struct HostRuntime {
    handlers: HashMap<String, Arc<dyn HostHandler>>,
    settings: Mutex<Map<String, Value>>,
    notifications: Mutex<Vec<String>>,
}

impl HostRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, command: &str, handler: Arc<dyn HostHandler>) {
        self.handlers.insert(command.to_string(), handler);
    }

    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Settings received through `update-settings`, merged.
    pub fn settings(&self) -> Map<String, Value> {
        self.settings.lock().clone()
    }

    pub fn notifications(&self) -> Vec<String> {
        self.notifications.lock().clone()
    }

    /// Serve one connection until the caller goes away or sends `close-plugin`.
    pub async fn serve(self: Arc<Self>, conn: Connection) {
        let Connection {
            sender,
            mut inbound,
        } = conn;
        info!("host runtime serving");

        while let Some(frame) = inbound.recv().await {
            let message = match serde_json::from_value::<Outbound>(frame) {
                Ok(message) => message,
                Err(e) => {
                    warn!(error = %e, "host dropping unrecognised frame");
                    continue;
                }
            };
            match message {
                Outbound::ExecuteCommand {
                    id,
                    command,
                    params,
                } => {
                    let runtime = Arc::clone(&self);
                    let call = HostCall {
                        id,
                        command,
                        sender: sender.clone(),
                    };
                    tokio::spawn(async move { runtime.run(call, params).await });
                }
                Outbound::UpdateSettings { settings } => {
                    debug!(keys = settings.len(), "host settings updated");
                    self.settings.lock().extend(settings);
                }
                Outbound::Notify { message } => {
                    info!(message = %message, "host notification");
                    self.notifications.lock().push(message);
                }
                Outbound::ClosePlugin => {
                    info!("close requested, host runtime stopping");
                    break;
                }
            }
        }
        info!("host runtime stopped");
    }

    async fn run(&self, call: HostCall, params: Value) {
        let reply = match self.handlers.get(&call.command) {
            Some(handler) => match handler.call(&call, params).await {
                Ok(result) => result_frame(&call.id, result),
                Err(error) => error_frame(&call.id, &error),
            },
            None => error_frame(&call.id, &format!("Unknown command: {}", call.command)),
        };
        if call.sender.send(reply).is_err() {
            debug!(id = %call.id, command = %call.command, "reply dropped, caller gone");
        }
    }
}
